use std::io::Read;
use std::path::Path;

use forge_types::ModelConfig;
use sha2::Digest;

const GGUF_MAGIC: [u8; 4] = *b"GGUF";

/// Outcome of validating an on-disk artifact against its declared config
/// (§4.2 step 3). `Invalid` carries a human-readable reason used to build
/// the eventual `PrepareFailed` message if re-download also fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Valid { meta: Option<GgufMeta> },
    Invalid { reason: String },
}

/// Minimal header fields sniffed from a GGUF-formatted artifact. Anything
/// claiming to speak the format advertises this much without needing a
/// full tensor-table parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GgufMeta {
    pub version: u32,
    pub tensor_count: u64,
    pub metadata_kv_count: u64,
}

/// Run the full validation pass: existence, non-emptiness, no dangling
/// `.ipull` marker, checksum (if declared), and a GGUF header sniff when
/// the artifact looks like one.
pub fn validate_artifact(
    path: &Path,
    ipull_marker: &Path,
    config: &ModelConfig,
) -> Validation {
    if ipull_marker.exists() {
        return Validation::Invalid {
            reason: "incomplete prior download (.ipull marker present)".into(),
        };
    }

    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(_) => {
            return Validation::Invalid {
                reason: "artifact does not exist".into(),
            }
        }
    };
    if metadata.len() == 0 {
        return Validation::Invalid {
            reason: "artifact is empty".into(),
        };
    }

    if let Some(expected) = &config.sha256 {
        match digest_file::<sha2::Sha256>(path) {
            Ok(actual) if actual.eq_ignore_ascii_case(expected) => {}
            Ok(actual) => {
                return Validation::Invalid {
                    reason: format!("sha256 mismatch: expected {expected}, got {actual}"),
                }
            }
            Err(e) => return Validation::Invalid { reason: e },
        }
    }

    if let Some(expected) = &config.md5 {
        match digest_file::<md5::Md5>(path) {
            Ok(actual) if actual.eq_ignore_ascii_case(expected) => {}
            Ok(actual) => {
                return Validation::Invalid {
                    reason: format!("md5 mismatch: expected {expected}, got {actual}"),
                }
            }
            Err(e) => return Validation::Invalid { reason: e },
        }
    }

    match sniff_gguf(path) {
        SniffResult::NotGguf => Validation::Valid { meta: None },
        SniffResult::Gguf(meta) => Validation::Valid { meta: Some(meta) },
        SniffResult::MalformedGguf(reason) => Validation::Invalid { reason },
    }
}

fn digest_file<D: Digest + Default>(path: &Path) -> Result<String, String> {
    let mut file = std::fs::File::open(path).map_err(|e| e.to_string())?;
    let mut hasher = D::default();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(|e| e.to_string())?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex_encode(&hasher.finalize()))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

enum SniffResult {
    NotGguf,
    Gguf(GgufMeta),
    MalformedGguf(String),
}

/// GGUF's header is `magic: [u8;4]`, `version: u32`, `tensor_count: u64`,
/// `metadata_kv_count: u64`, all little-endian. A file not starting with
/// the magic is simply not GGUF and is left to whatever validation the
/// caller already ran (checksum); one that starts with the magic but
/// can't finish parsing the header is a malformed artifact.
fn sniff_gguf(path: &Path) -> SniffResult {
    let mut file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(_) => return SniffResult::NotGguf,
    };
    let mut header = [0u8; 24];
    match file.read_exact(&mut header) {
        Ok(()) => {}
        Err(_) => return SniffResult::NotGguf,
    }
    if header[0..4] != GGUF_MAGIC {
        return SniffResult::NotGguf;
    }
    let version = u32::from_le_bytes(header[4..8].try_into().unwrap());
    let tensor_count = u64::from_le_bytes(header[8..16].try_into().unwrap());
    let metadata_kv_count = u64::from_le_bytes(header[16..24].try_into().unwrap());
    if version == 0 || version > 16 {
        return SniffResult::MalformedGguf(format!("implausible gguf version {version}"));
    }
    SniffResult::Gguf(GgufMeta {
        version,
        tensor_count,
        metadata_kv_count,
    })
}
