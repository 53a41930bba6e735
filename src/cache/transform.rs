//! Transform Pipeline Module
//!
//! Compression (zstd) and encryption (AES-256-GCM) of stored payloads.
//!
//! Writes apply compress then encrypt, reads reverse the order. The work is
//! done by a dedicated worker task reached over a channel so that large
//! payloads never run on the caller's task; each request carries an id that
//! the worker echoes back with its reply.

use std::sync::Arc;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{Config, ENCRYPTION_KEY_LEN};

/// AES-GCM nonce length, prefixed to every ciphertext.
const NONCE_LEN: usize = 12;

// == Transform Error ==
#[derive(Error, Debug)]
pub enum TransformError {
    #[error("Decompression failed: {0}")]
    Decompress(#[source] std::io::Error),

    #[error("Decryption failed")]
    Decrypt,

    #[error("Payload is encrypted but no encryption key is configured")]
    KeyUnavailable,

    #[error("Transform worker closed")]
    WorkerClosed,

    #[error("Transform task failed: {0}")]
    TaskFailed(String),
}

// == Stored Payload ==
/// Bytes as held by the entry store, with the transforms actually applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPayload {
    #[serde(with = "base64_bytes")]
    pub bytes: Vec<u8>,
    pub compressed: bool,
    pub encrypted: bool,
}

impl StoredPayload {
    /// Untransformed payload.
    pub fn plain(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            compressed: false,
            encrypted: false,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn is_plain(&self) -> bool {
        !self.compressed && !self.encrypted
    }
}

/// Which transforms a namespace asks for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformOptions {
    pub compress: bool,
    pub encrypt: bool,
}

impl TransformOptions {
    fn is_noop(&self) -> bool {
        !self.compress && !self.encrypt
    }
}

// == Codec ==
/// Synchronous compress/encrypt implementation run by the worker.
#[derive(Clone)]
pub struct Codec {
    cipher: Option<Aes256Gcm>,
    zstd_level: i32,
    min_compress_size: usize,
}

impl Codec {
    pub fn new(
        key: Option<[u8; ENCRYPTION_KEY_LEN]>,
        zstd_level: i32,
        min_compress_size: usize,
    ) -> Self {
        Self {
            cipher: key.map(|k| Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&k))),
            zstd_level,
            min_compress_size,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.encryption_key,
            config.zstd_level,
            config.compression_min_size,
        )
    }

    /// True when an encryption key is configured.
    pub fn can_encrypt(&self) -> bool {
        self.cipher.is_some()
    }

    // == Encode ==
    /// Applies the requested transforms.
    ///
    /// Never fails: a step that cannot be applied is skipped and the returned
    /// flags record what was actually done.
    pub fn encode(&self, bytes: Vec<u8>, options: TransformOptions) -> StoredPayload {
        let mut payload = StoredPayload::plain(bytes);

        if options.compress && payload.len() >= self.min_compress_size {
            match zstd::encode_all(payload.bytes.as_slice(), self.zstd_level) {
                Ok(compressed) if compressed.len() < payload.len() => {
                    payload.bytes = compressed;
                    payload.compressed = true;
                }
                Ok(_) => debug!("Compression skipped: no size gain"),
                Err(e) => warn!("Compression failed, storing uncompressed: {}", e),
            }
        }

        if options.encrypt {
            match &self.cipher {
                Some(cipher) => {
                    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
                    match cipher.encrypt(&nonce, payload.bytes.as_slice()) {
                        Ok(ciphertext) => {
                            let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
                            sealed.extend_from_slice(&nonce);
                            sealed.extend_from_slice(&ciphertext);
                            payload.bytes = sealed;
                            payload.encrypted = true;
                        }
                        Err(_) => warn!("Encryption failed, storing unencrypted payload"),
                    }
                }
                None => debug!("No encryption key configured, storing unencrypted payload"),
            }
        }

        payload
    }

    // == Decode ==
    /// Reverses the transforms recorded on the payload.
    pub fn decode(&self, payload: StoredPayload) -> Result<Vec<u8>, TransformError> {
        let mut bytes = payload.bytes;

        if payload.encrypted {
            let cipher = self.cipher.as_ref().ok_or(TransformError::KeyUnavailable)?;
            if bytes.len() < NONCE_LEN {
                return Err(TransformError::Decrypt);
            }
            let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
            bytes = cipher
                .decrypt(Nonce::from_slice(nonce), ciphertext)
                .map_err(|_| TransformError::Decrypt)?;
        }

        if payload.compressed {
            bytes = zstd::decode_all(bytes.as_slice()).map_err(TransformError::Decompress)?;
        }

        Ok(bytes)
    }
}

// == Worker Protocol ==
struct Reply<T> {
    id: Uuid,
    result: T,
}

impl<T> Reply<T> {
    /// Unwraps the reply, rejecting one addressed to another request.
    fn for_request(self, id: Uuid) -> Result<T, TransformError> {
        if self.id != id {
            warn!(expected = %id, received = %self.id, "Transform reply id mismatch");
            return Err(TransformError::TaskFailed(format!(
                "reply {} does not match request {}",
                self.id, id
            )));
        }
        Ok(self.result)
    }
}

enum TransformCommand {
    Encode {
        id: Uuid,
        bytes: Vec<u8>,
        options: TransformOptions,
        response_tx: oneshot::Sender<Reply<Result<StoredPayload, TransformError>>>,
    },
    Decode {
        id: Uuid,
        payload: StoredPayload,
        response_tx: oneshot::Sender<Reply<Result<Vec<u8>, TransformError>>>,
    },
    Shutdown,
}

// == Transformer ==
/// Cloneable handle to the transform worker.
#[derive(Clone)]
pub struct Transformer {
    tx: mpsc::UnboundedSender<TransformCommand>,
    can_encrypt: bool,
}

impl Transformer {
    /// Spawns the worker task and returns a handle to it.
    pub fn spawn(codec: Codec) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let can_encrypt = codec.can_encrypt();
        let handle = tokio::spawn(worker_loop(Arc::new(codec), rx));
        (Self { tx, can_encrypt }, handle)
    }

    pub fn can_encrypt(&self) -> bool {
        self.can_encrypt
    }

    /// Transforms bytes for storage.
    pub async fn encode(
        &self,
        bytes: Vec<u8>,
        options: TransformOptions,
    ) -> Result<StoredPayload, TransformError> {
        if options.is_noop() {
            return Ok(StoredPayload::plain(bytes));
        }

        let id = Uuid::new_v4();
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(TransformCommand::Encode {
                id,
                bytes,
                options,
                response_tx,
            })
            .map_err(|_| TransformError::WorkerClosed)?;

        let reply = response_rx.await.map_err(|_| TransformError::WorkerClosed)?;
        reply.for_request(id)?
    }

    /// Restores the original bytes of a stored payload.
    pub async fn decode(&self, payload: StoredPayload) -> Result<Vec<u8>, TransformError> {
        if payload.is_plain() {
            return Ok(payload.bytes);
        }

        let id = Uuid::new_v4();
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(TransformCommand::Decode {
                id,
                payload,
                response_tx,
            })
            .map_err(|_| TransformError::WorkerClosed)?;

        let reply = response_rx.await.map_err(|_| TransformError::WorkerClosed)?;
        reply.for_request(id)?
    }

    /// Asks the worker to stop; in-flight requests still get their replies.
    pub fn shutdown(&self) {
        let _ = self.tx.send(TransformCommand::Shutdown);
    }
}

async fn worker_loop(codec: Arc<Codec>, mut rx: mpsc::UnboundedReceiver<TransformCommand>) {
    info!("Transform worker started");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            TransformCommand::Encode {
                id,
                bytes,
                options,
                response_tx,
            } => {
                let codec = Arc::clone(&codec);
                tokio::spawn(async move {
                    let input_len = bytes.len();
                    let result = tokio::task::spawn_blocking(move || codec.encode(bytes, options))
                        .await
                        .map_err(|e| TransformError::TaskFailed(e.to_string()));
                    if let Ok(stored) = &result {
                        debug!(%id, input_len, stored_len = stored.len(), "Encoded payload");
                    }
                    let _ = response_tx.send(Reply { id, result });
                });
            }
            TransformCommand::Decode {
                id,
                payload,
                response_tx,
            } => {
                let codec = Arc::clone(&codec);
                tokio::spawn(async move {
                    let result = tokio::task::spawn_blocking(move || codec.decode(payload))
                        .await
                        .unwrap_or_else(|e| Err(TransformError::TaskFailed(e.to_string())));
                    debug!(%id, ok = result.is_ok(), "Decoded payload");
                    let _ = response_tx.send(Reply { id, result });
                });
            }
            TransformCommand::Shutdown => {
                info!("Transform worker shutdown requested");
                break;
            }
        }
    }

    info!("Transform worker stopped");
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; ENCRYPTION_KEY_LEN] = [42u8; ENCRYPTION_KEY_LEN];

    fn compressible() -> Vec<u8> {
        b"the quick brown fox jumps over the lazy dog ".repeat(64)
    }

    fn all_options() -> Vec<TransformOptions> {
        let mut out = Vec::new();
        for compress in [false, true] {
            for encrypt in [false, true] {
                out.push(TransformOptions { compress, encrypt });
            }
        }
        out
    }

    #[test]
    fn test_reply_for_other_request_rejected() {
        let id = Uuid::new_v4();
        let reply = Reply { id, result: 7u8 };
        assert_eq!(reply.for_request(id).unwrap(), 7);

        let stray = Reply { id: Uuid::new_v4(), result: 7u8 };
        assert!(matches!(
            stray.for_request(id),
            Err(TransformError::TaskFailed(_))
        ));
    }

    #[test]
    fn test_codec_roundtrip_all_combinations() {
        let codec = Codec::new(Some(KEY), 3, 16);
        let data = compressible();

        for options in all_options() {
            let stored = codec.encode(data.clone(), options);
            assert_eq!(stored.compressed, options.compress, "{:?}", options);
            assert_eq!(stored.encrypted, options.encrypt, "{:?}", options);
            assert_eq!(codec.decode(stored).unwrap(), data, "{:?}", options);
        }
    }

    #[test]
    fn test_compression_shrinks_payload() {
        let codec = Codec::new(None, 3, 16);
        let data = compressible();
        let stored = codec.encode(
            data.clone(),
            TransformOptions {
                compress: true,
                encrypt: false,
            },
        );
        assert!(stored.compressed);
        assert!(stored.len() < data.len());
    }

    #[test]
    fn test_small_payload_not_compressed() {
        let codec = Codec::new(None, 3, 1024);
        let stored = codec.encode(
            b"tiny".to_vec(),
            TransformOptions {
                compress: true,
                encrypt: false,
            },
        );
        assert!(!stored.compressed);
        assert_eq!(stored.bytes, b"tiny");
    }

    #[test]
    fn test_encryption_falls_back_without_key() {
        let codec = Codec::new(None, 3, 16);
        let stored = codec.encode(
            b"secret".to_vec(),
            TransformOptions {
                compress: false,
                encrypt: true,
            },
        );
        assert!(!stored.encrypted);
        assert_eq!(codec.decode(stored).unwrap(), b"secret");
    }

    #[test]
    fn test_ciphertext_differs_from_plaintext() {
        let codec = Codec::new(Some(KEY), 3, 16);
        let stored = codec.encode(
            b"secret".to_vec(),
            TransformOptions {
                compress: false,
                encrypt: true,
            },
        );
        assert!(stored.encrypted);
        assert_eq!(stored.len(), NONCE_LEN + 6 + 16);
        assert!(!stored.bytes.windows(6).any(|w| w == b"secret"));
    }

    #[test]
    fn test_decrypt_without_key_fails() {
        let sealed = Codec::new(Some(KEY), 3, 16).encode(
            b"secret".to_vec(),
            TransformOptions {
                compress: false,
                encrypt: true,
            },
        );
        let result = Codec::new(None, 3, 16).decode(sealed);
        assert!(matches!(result, Err(TransformError::KeyUnavailable)));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let codec = Codec::new(Some(KEY), 3, 16);
        let mut sealed = codec.encode(
            b"secret".to_vec(),
            TransformOptions {
                compress: false,
                encrypt: true,
            },
        );
        let last = sealed.bytes.len() - 1;
        sealed.bytes[last] ^= 0xff;
        assert!(matches!(codec.decode(sealed), Err(TransformError::Decrypt)));
    }

    #[test]
    fn test_corrupt_compressed_payload_fails() {
        let codec = Codec::new(None, 3, 16);
        let bogus = StoredPayload {
            bytes: vec![1, 2, 3, 4],
            compressed: true,
            encrypted: false,
        };
        assert!(matches!(
            codec.decode(bogus),
            Err(TransformError::Decompress(_))
        ));
    }

    #[tokio::test]
    async fn test_worker_concurrent_requests() {
        let (transformer, handle) = Transformer::spawn(Codec::new(Some(KEY), 3, 16));
        let options = TransformOptions {
            compress: true,
            encrypt: true,
        };

        let mut tasks = Vec::new();
        for i in 0..16u8 {
            let transformer = transformer.clone();
            tasks.push(tokio::spawn(async move {
                let data = vec![i; 512 + i as usize];
                let stored = transformer.encode(data.clone(), options).await.unwrap();
                let restored = transformer.decode(stored).await.unwrap();
                assert_eq!(restored, data);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        transformer.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_worker_closed_after_shutdown() {
        let (transformer, handle) = Transformer::spawn(Codec::new(None, 3, 16));
        transformer.shutdown();
        handle.await.unwrap();

        let options = TransformOptions {
            compress: true,
            encrypt: false,
        };
        let result = transformer.encode(compressible(), options).await;
        assert!(matches!(result, Err(TransformError::WorkerClosed)));
    }

    #[test]
    fn test_payload_serializes_as_base64() {
        let payload = StoredPayload::plain(vec![0xde, 0xad, 0xbe, 0xef]);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["bytes"], "3q2+7w==");
    }
}
