pub mod client;
pub mod serialization;
pub mod signature;
pub mod transmission;

pub use client::{
    AzureCloud, ClientConfig, ClientError, ClientStats, ConnectionStats, EndpointConfig,
    HttpClient,
};
pub use serialization::{
    EncodedPayload, FlatRecordFormatter, PayloadCodec, RecordFormatter, SerializationError,
};
pub use signature::{SharedKeySigner, SignatureError, sign};
pub use transmission::{
    BatchDelivery, BatchTransmitter, DeliveryOutcome, SignedRequest, TransmissionError,
    TransmissionResult,
};
