//! Per-OID value encoding and decoding.
//!
//! The registry maps a type OID to an (encode, decode) codec pair. Decoding
//! an unregistered OID yields [`PgValue::Unknown`] carrying the raw payload;
//! encoding an unregistered OID is an error. Additional codecs can be
//! registered until the first session opens against the registry, after
//! which it is frozen.

mod array;
mod geometric;
mod json;
mod scalar;
mod temporal;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};
use crate::protocol::types::{FormatCode, Oid};
use crate::value::PgValue;

/// Encoder half of a codec: append the raw payload (no length prefix) and
/// report the format it was written in.
pub type EncodeFn =
    Box<dyn Fn(&TypeRegistry, &PgValue, &mut Vec<u8>) -> Result<FormatCode> + Send + Sync>;

/// Decoder half of a codec.
pub type DecodeFn = Box<dyn Fn(&TypeRegistry, FormatCode, &[u8]) -> Result<PgValue> + Send + Sync>;

/// An (encode, decode) pair for one type OID.
pub struct TypeCodec {
    encode: EncodeFn,
    decode: DecodeFn,
}

impl TypeCodec {
    /// Build a codec from an encoder and a decoder.
    pub fn new<E, D>(encode: E, decode: D) -> Self
    where
        E: Fn(&TypeRegistry, &PgValue, &mut Vec<u8>) -> Result<FormatCode> + Send + Sync + 'static,
        D: Fn(&TypeRegistry, FormatCode, &[u8]) -> Result<PgValue> + Send + Sync + 'static,
    {
        Self {
            encode: Box::new(encode),
            decode: Box::new(decode),
        }
    }
}

/// Registry of per-OID codecs.
pub struct TypeRegistry {
    codecs: RwLock<HashMap<Oid, Arc<TypeCodec>>>,
    frozen: AtomicBool,
}

impl TypeRegistry {
    /// A registry with all built-in codecs.
    pub fn new() -> Self {
        let mut codecs = HashMap::new();
        scalar::register_defaults(&mut codecs);
        temporal::register_defaults(&mut codecs);
        json::register_defaults(&mut codecs);
        geometric::register_defaults(&mut codecs);
        array::register_defaults(&mut codecs);
        Self {
            codecs: RwLock::new(codecs),
            frozen: AtomicBool::new(false),
        }
    }

    /// A registry without any codecs (everything decodes as raw bytes).
    pub fn empty() -> Self {
        Self {
            codecs: RwLock::new(HashMap::new()),
            frozen: AtomicBool::new(false),
        }
    }

    /// Register a codec for an OID.
    ///
    /// Fails once the registry has been frozen by an opened session.
    pub fn register(&self, oid: Oid, codec: TypeCodec) -> Result<()> {
        if self.frozen.load(Ordering::Acquire) {
            return Err(Error::InvalidUsage(
                "type registry is frozen: a session has already opened against it".into(),
            ));
        }
        self.codecs
            .write()
            .expect("registry lock poisoned")
            .insert(oid, Arc::new(codec));
        Ok(())
    }

    /// Freeze the registry. Called when a session opens against it.
    pub(crate) fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    fn lookup(&self, oid: Oid) -> Option<Arc<TypeCodec>> {
        self.codecs
            .read()
            .expect("registry lock poisoned")
            .get(&oid)
            .cloned()
    }

    /// True if a codec is registered for the OID.
    pub fn is_registered(&self, oid: Oid) -> bool {
        self.codecs
            .read()
            .expect("registry lock poisoned")
            .contains_key(&oid)
    }

    /// Result format to request for a column of the given OID: binary where
    /// a codec is registered, text otherwise.
    pub fn result_format(&self, oid: Oid) -> FormatCode {
        if self.is_registered(oid) {
            FormatCode::Binary
        } else {
            FormatCode::Text
        }
    }

    /// Decode a non-null column payload.
    ///
    /// NULL (wire length -1) is handled at the protocol layer and never
    /// reaches the registry. Unregistered OIDs pass through as
    /// [`PgValue::Unknown`].
    pub fn decode(&self, oid: Oid, format: FormatCode, bytes: &[u8]) -> Result<PgValue> {
        match self.lookup(oid) {
            Some(codec) => (codec.decode)(self, format, bytes),
            None => Ok(PgValue::Unknown {
                oid,
                format,
                bytes: bytes.to_vec(),
            }),
        }
    }

    /// Encode a value, appending the raw payload to `buf`.
    ///
    /// Returns the parameter OID and the format used. [`PgValue::Unknown`]
    /// passes through verbatim with its stated format; any other value of an
    /// unregistered OID fails with `UnsupportedType`.
    pub fn encode_value(&self, value: &PgValue, buf: &mut Vec<u8>) -> Result<(Oid, FormatCode)> {
        if let PgValue::Unknown { oid, format, bytes } = value {
            buf.extend_from_slice(bytes);
            return Ok((*oid, *format));
        }

        let oid = value.oid().ok_or(Error::UnsupportedType(0))?;
        let codec = self.lookup(oid).ok_or(Error::UnsupportedType(oid))?;
        let format = (codec.encode)(self, value, buf)?;
        Ok((oid, format))
    }

    /// Encode a parameter vector for a Bind message.
    pub fn encode_params(&self, params: &[Option<PgValue>]) -> Result<EncodedParams> {
        let mut out = EncodedParams {
            count: params.len() as u16,
            formats: Vec::with_capacity(params.len()),
            oids: Vec::with_capacity(params.len()),
            data: Vec::new(),
        };

        for param in params {
            match param {
                None => {
                    out.data.extend_from_slice(&(-1_i32).to_be_bytes());
                    out.formats.push(FormatCode::Binary);
                    out.oids.push(0);
                }
                Some(value) => {
                    let start = out.data.len();
                    out.data.extend_from_slice(&[0, 0, 0, 0]);
                    let (oid, format) = self.encode_value(value, &mut out.data)?;
                    let len = (out.data.len() - start - 4) as i32;
                    out.data[start..start + 4].copy_from_slice(&len.to_be_bytes());
                    out.formats.push(format);
                    out.oids.push(oid);
                }
            }
        }

        Ok(out)
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("frozen", &self.frozen.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Parameter vector encoded for a Bind message.
#[derive(Debug, Clone)]
pub struct EncodedParams {
    /// Number of parameters
    pub count: u16,
    /// Per-parameter format codes
    pub formats: Vec<FormatCode>,
    /// Per-parameter OIDs (0 for NULL of unknown type)
    pub oids: Vec<Oid>,
    /// Length-prefixed parameter payloads
    pub data: Vec<u8>,
}
