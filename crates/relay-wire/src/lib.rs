//! CortexRelay wire layer
//!
//! Prometheus Remote Write v0.1.0 message types and the Snappy-compressed
//! protobuf codec used on both the ingress and egress sides of the relay.
//!
//! The protobuf types are hand-written prost derives matching
//! `prometheus/prompb/remote.proto` and `types.proto`, which avoids protoc
//! and proto file management at build time.

use prost::Message;

pub mod proto {
    //! Remote Write protobuf messages.

    /// Top-level Remote Write message: a batch of time series plus optional
    /// metric metadata.
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct WriteRequest {
        /// The time series to write.
        #[prost(message, repeated, tag = "1")]
        pub timeseries: Vec<TimeSeries>,
        /// Metadata entries for metric families referenced by the batch.
        #[prost(message, repeated, tag = "3")]
        pub metadata: Vec<MetricMetadata>,
    }

    /// A single time series with labels and samples.
    ///
    /// Label order is significant: downstream deduplication in
    /// Prometheus/Thanos depends on it, so the codec must never reorder.
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct TimeSeries {
        /// Metric labels identifying the series.
        #[prost(message, repeated, tag = "1")]
        pub labels: Vec<Label>,
        /// Data samples for this series.
        #[prost(message, repeated, tag = "2")]
        pub samples: Vec<Sample>,
    }

    /// A key-value label pair.
    #[derive(Clone, PartialEq, Eq, Hash, prost::Message)]
    pub struct Label {
        /// Label name.
        #[prost(string, tag = "1")]
        pub name: String,
        /// Label value.
        #[prost(string, tag = "2")]
        pub value: String,
    }

    /// A single data sample (value + timestamp).
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Sample {
        /// The sample value.
        #[prost(double, tag = "1")]
        pub value: f64,
        /// Timestamp in milliseconds since epoch.
        #[prost(int64, tag = "2")]
        pub timestamp: i64,
    }

    /// Metadata describing a metric family.
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct MetricMetadata {
        /// Metric type, see [`MetricType`].
        #[prost(enumeration = "MetricType", tag = "1")]
        pub metric_type: i32,
        /// Name of the metric family the metadata belongs to.
        #[prost(string, tag = "2")]
        pub metric_family_name: String,
        /// Help text for the metric family.
        #[prost(string, tag = "4")]
        pub help: String,
        /// Unit of the metric family.
        #[prost(string, tag = "5")]
        pub unit: String,
    }

    /// Metric family types carried in [`MetricMetadata`].
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
    #[repr(i32)]
    pub enum MetricType {
        Unknown = 0,
        Counter = 1,
        Gauge = 2,
        Histogram = 3,
        Gaugehistogram = 4,
        Summary = 5,
        Info = 6,
        Stateset = 7,
    }

    impl Label {
        /// Convenience constructor.
        pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                value: value.into(),
            }
        }
    }
}

/// Errors produced while decoding or encoding a Remote Write body.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("unable to unpack Snappy: {0}")]
    Snappy(#[from] snap::Error),

    #[error("unable to unmarshal protobuf: {0}")]
    Protobuf(#[from] prost::DecodeError),

    #[error("unable to marshal protobuf: {0}")]
    Encode(#[from] prost::EncodeError),
}

/// Result type for codec operations.
pub type Result<T> = std::result::Result<T, WireError>;

/// Decodes a Snappy-compressed protobuf Remote Write body.
///
/// Fails with [`WireError::Snappy`] when the compressed frame is invalid and
/// [`WireError::Protobuf`] when the decompressed bytes are not a valid
/// `WriteRequest`. Both surface as 400 to the sender.
pub fn decode_write_request(body: &[u8]) -> Result<proto::WriteRequest> {
    let decoded = snap::raw::Decoder::new().decompress_vec(body)?;
    let req = proto::WriteRequest::decode(decoded.as_slice())?;

    Ok(req)
}

/// Encodes a `WriteRequest` to Snappy-compressed protobuf bytes for egress.
///
/// The inverse of [`decode_write_request`]: label slices pass through
/// bit-exactly, so series the classifier did not touch re-encode unchanged.
pub fn encode_write_request(req: &proto::WriteRequest) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(req.encoded_len());
    req.encode(&mut buf)?;

    Ok(snap::raw::Encoder::new().compress_vec(&buf)?)
}
