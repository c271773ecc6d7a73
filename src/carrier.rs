//! The carrier contract: how propagation formats read and write headers.
//!
//! A carrier is whatever structure the transport hands us, usually an HTTP
//! header map. The read side is a visitor over `(key, value)` pairs that can
//! stop the walk early by returning an error; the write side overwrites any
//! previous value for a key. Key comparison is case-insensitive and happens
//! inside each format.

use std::collections::HashMap;
use std::fmt;
use std::hash::BuildHasher;

use crate::Error;

/// Read half of a carrier: yields every `(key, value)` pair to a visitor.
pub trait TextMapReader {
    /// Visits each pair in turn, stopping at the first visitor error.
    fn for_each(
        &self,
        visitor: &mut dyn FnMut(&str, &str) -> Result<(), Error>,
    ) -> Result<(), Error>;
}

/// Write half of a carrier.
pub trait TextMapWriter {
    /// Sets a key to a value, overwriting any previous value for the key.
    fn set(&mut self, key: &str, value: &str);
}

impl<S: BuildHasher> TextMapReader for HashMap<String, String, S> {
    fn for_each(
        &self,
        visitor: &mut dyn FnMut(&str, &str) -> Result<(), Error>,
    ) -> Result<(), Error> {
        for (key, value) in self {
            visitor(key, value)?;
        }
        Ok(())
    }
}

impl<S: BuildHasher> TextMapWriter for HashMap<String, String, S> {
    fn set(&mut self, key: &str, value: &str) {
        self.insert(key.to_owned(), value.to_owned());
    }
}

/// The carrier shapes the engine understands.
///
/// Injection needs write capability and extraction needs read capability;
/// asking a shape for a capability it lacks yields [`Error::InvalidCarrier`].
pub enum Carrier<'a> {
    /// The read side of a text map.
    Reader(&'a dyn TextMapReader),
    /// The write side of a text map.
    Writer(&'a mut dyn TextMapWriter),
    /// HTTP headers, usable in both directions.
    HttpHeaders(&'a mut http::HeaderMap),
}

impl fmt::Debug for Carrier<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Carrier::Reader(_) => f.write_str("Carrier::Reader"),
            Carrier::Writer(_) => f.write_str("Carrier::Writer"),
            Carrier::HttpHeaders(headers) => {
                f.debug_tuple("Carrier::HttpHeaders").field(headers).finish()
            }
        }
    }
}

/// Reads `http::HeaderMap` entries, skipping values that are not valid ASCII.
pub(crate) struct HeaderReader<'a>(pub(crate) &'a http::HeaderMap);

impl TextMapReader for HeaderReader<'_> {
    fn for_each(
        &self,
        visitor: &mut dyn FnMut(&str, &str) -> Result<(), Error>,
    ) -> Result<(), Error> {
        for (name, value) in self.0.iter() {
            if let Ok(value) = value.to_str() {
                visitor(name.as_str(), value)?;
            }
        }
        Ok(())
    }
}

/// Writes into an `http::HeaderMap`. Does nothing when the key or value is
/// not a valid header name or value.
pub(crate) struct HeaderWriter<'a>(pub(crate) &'a mut http::HeaderMap);

impl TextMapWriter for HeaderWriter<'_> {
    fn set(&mut self, key: &str, value: &str) {
        if let Ok(name) = http::header::HeaderName::from_bytes(key.as_bytes()) {
            if let Ok(value) = http::header::HeaderValue::from_str(value) {
                self.0.insert(name, value);
            }
        }
    }
}
