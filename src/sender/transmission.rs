use super::client::HttpClient;
use super::serialization::{PayloadCodec, SerializationError};
use super::signature::{
    SIGNED_CONTENT_TYPE, SIGNED_DATE_HEADER, SharedKeySigner, authorization_header, rfc1123_date,
};
use crate::buffer::Batch;
use crate::diagnostics::SELF_LOG_TARGET;
use chrono::Utc;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use std::future::Future;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

const LOG_TYPE_HEADER: &str = "log-type";
const TIME_GENERATED_FIELD_HEADER: &str = "time-generated-field";
const MAX_ERROR_BODY_CHARS: usize = 512;

#[derive(Error, Debug)]
pub enum TransmissionError {
    #[error("Serialization failed: {0}")]
    SerializationFailed(#[from] SerializationError),
    #[error("Request error: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("HTTP error: {status} - {message}")]
    HttpError { status: u16, message: String },
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(String),
}

impl TransmissionError {
    /// Whether sending the same batch again could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransmissionError::RequestError(_) | TransmissionError::Timeout(_) => true,
            TransmissionError::HttpError { status, .. } => {
                *status == StatusCode::REQUEST_TIMEOUT.as_u16()
                    || *status == StatusCode::TOO_MANY_REQUESTS.as_u16()
                    || (500..600).contains(status)
            }
            TransmissionError::SerializationFailed(_)
            | TransmissionError::InvalidHeaderValue(_) => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransmissionResult {
    pub status_code: u16,
    pub latency: Duration,
    pub batch_id: String,
    pub events: usize,
    pub bytes_sent: usize,
}

/// Everything that goes on the wire for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    pub content_length: usize,
    pub date: String,
    pub signature: String,
    pub body: String,
}

#[derive(Debug)]
pub enum DeliveryOutcome {
    Delivered(TransmissionResult),
    Failed(TransmissionError),
}

impl DeliveryOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered(_))
    }
}

/// Seam between the scheduler and whatever actually ships a batch.
pub trait BatchDelivery: Send + Sync + 'static {
    /// Never panics and never returns an error: failures are folded into
    /// the outcome.
    fn deliver(&self, batch: &Batch) -> impl Future<Output = DeliveryOutcome> + Send;
}

/// Encodes, signs and posts batches to the ingestion endpoint.
#[derive(Debug, Clone)]
pub struct BatchTransmitter {
    pub client: HttpClient,
    codec: PayloadCodec,
    signer: SharedKeySigner,
    time_generated_field: Option<String>,
}

impl BatchTransmitter {
    pub fn new(client: HttpClient, codec: PayloadCodec, signer: SharedKeySigner) -> Self {
        Self {
            client,
            codec,
            signer,
            time_generated_field: None,
        }
    }

    /// Tells the service which record field holds the event time.
    pub fn with_time_generated_field(mut self, field: impl Into<String>) -> Self {
        self.time_generated_field = Some(field.into());
        self
    }

    /// Serializes the batch and signs it with the current time.
    pub fn sign_batch(&self, batch: &Batch) -> Result<SignedRequest, TransmissionError> {
        let payload = self.codec.encode(batch.events())?;
        let date = rfc1123_date(Utc::now());
        let signature = self.signer.sign(payload.content_length, &date);

        Ok(SignedRequest {
            content_length: payload.content_length,
            date,
            signature,
            body: payload.body,
        })
    }

    pub fn build_headers(&self, request: &SignedRequest) -> Result<HeaderMap, TransmissionError> {
        let mut headers = HeaderMap::new();

        headers.insert(CONTENT_TYPE, HeaderValue::from_static(SIGNED_CONTENT_TYPE));

        headers.insert(
            AUTHORIZATION,
            header_value(&authorization_header(
                self.client.workspace_id(),
                &request.signature,
            ))?,
        );

        headers.insert(
            HeaderName::from_static(SIGNED_DATE_HEADER),
            header_value(&request.date)?,
        );

        headers.insert(
            HeaderName::from_static(LOG_TYPE_HEADER),
            header_value(self.client.log_type())?,
        );

        if let Some(field) = &self.time_generated_field {
            headers.insert(
                HeaderName::from_static(TIME_GENERATED_FIELD_HEADER),
                header_value(field)?,
            );
        }

        Ok(headers)
    }

    /// Sends one signed request. Any non-2xx status is an error.
    pub async fn post(&self, request: SignedRequest) -> Result<(u16, Duration), TransmissionError> {
        let headers = self.build_headers(&request)?;
        let timeout = self.client.config.timeout;
        let start = Instant::now();

        let result = self
            .client
            .client
            .post(self.client.ingestion_url.clone())
            .headers(headers)
            .timeout(timeout)
            .body(request.body)
            .send()
            .await;
        let latency = start.elapsed();

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                self.client.stats.record_request(false, latency);
                if e.is_timeout() {
                    return Err(TransmissionError::Timeout(timeout));
                }
                return Err(TransmissionError::RequestError(e));
            }
        };

        let status = response.status();
        self.client.stats.record_request(status.is_success(), latency);

        if status.is_success() {
            if status != StatusCode::OK {
                debug!("Ingestion endpoint answered {} instead of 200 OK", status);
            }
            return Ok((status.as_u16(), latency));
        }

        let body = response.text().await.unwrap_or_default();
        let message: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
        Err(TransmissionError::HttpError {
            status: status.as_u16(),
            message: if message.is_empty() {
                status.canonical_reason().unwrap_or("unknown").to_string()
            } else {
                message
            },
        })
    }

    pub async fn send_batch(&self, batch: &Batch) -> Result<TransmissionResult, TransmissionError> {
        let request = self.sign_batch(batch)?;
        let bytes_sent = request.content_length;

        debug!(
            "Sending batch {} with {} events ({} bytes)",
            batch.id(),
            batch.size(),
            bytes_sent
        );

        let (status_code, latency) = self.post(request).await?;

        Ok(TransmissionResult {
            status_code,
            latency,
            batch_id: batch.id().to_string(),
            events: batch.size(),
            bytes_sent,
        })
    }
}

impl BatchDelivery for BatchTransmitter {
    async fn deliver(&self, batch: &Batch) -> DeliveryOutcome {
        match self.send_batch(batch).await {
            Ok(result) => {
                info!(
                    target: SELF_LOG_TARGET,
                    batch_id = %result.batch_id,
                    events = result.events,
                    bytes = result.bytes_sent,
                    status = result.status_code,
                    latency_ms = result.latency.as_millis() as u64,
                    "Delivered batch to Log Analytics"
                );
                DeliveryOutcome::Delivered(result)
            }
            Err(e) => {
                warn!(
                    target: SELF_LOG_TARGET,
                    batch_id = %batch.id(),
                    events = batch.size(),
                    retryable = e.is_retryable(),
                    error = %e,
                    "Failed to deliver batch to Log Analytics"
                );
                DeliveryOutcome::Failed(e)
            }
        }
    }
}

fn header_value(value: &str) -> Result<HeaderValue, TransmissionError> {
    HeaderValue::from_str(value)
        .map_err(|e| TransmissionError::InvalidHeaderValue(format!("'{value}': {e}")))
}
