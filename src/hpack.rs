//! The HPACK glue between decoded header lists and this
//! crate's request/response types.
//!
//! Treats `fluke-hpack` as an external black box: all we do here is drive
//! its `Decoder`/`Encoder`, split pseudo-headers
//! (`:method`, `:scheme`, ...) out of the regular header list as they
//! come off the wire, and enforce the peer's advertised
//! `SETTINGS_MAX_HEADER_LIST_SIZE` the same way RFC 7540 §6.5.2 defines
//! list size (name + value + 32 bytes overhead per entry).

use crate::error::ProtocolError;
use crate::frame::PseudoHeaders;

const PER_HEADER_OVERHEAD: usize = 32;

/// A single non-pseudo header as decoded off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Default, Clone)]
pub struct DecodedHeaders {
    pub pseudo: PseudoHeaders,
    pub fields: Vec<Header>,
}

pub struct HpackDecoder {
    inner: fluke_hpack::Decoder<'static>,
    max_header_list_size: usize,
}

impl HpackDecoder {
    pub fn new(max_header_list_size: usize) -> HpackDecoder {
        HpackDecoder {
            inner: fluke_hpack::Decoder::new(),
            max_header_list_size,
        }
    }

    pub fn set_max_header_list_size(&mut self, n: usize) {
        self.max_header_list_size = n;
    }

    /// Decodes a complete header block (already reassembled from
    /// HEADERS + any trailing CONTINUATION frames by the reader loop).
    pub fn decode(&mut self, block: &[u8]) -> Result<DecodedHeaders, ProtocolError> {
        let pairs = self
            .inner
            .decode(block)
            .map_err(|_| ProtocolError::Reason(crate::frame::Reason::COMPRESSION_ERROR))?;

        let mut total = 0usize;
        let mut out = DecodedHeaders::default();
        for (name, value) in pairs {
            total += name.len() + value.len() + PER_HEADER_OVERHEAD;
            if total > self.max_header_list_size {
                return Err(ProtocolError::Reason(crate::frame::Reason::ENHANCE_YOUR_CALM));
            }

            let name = String::from_utf8_lossy(&name).into_owned();
            let value = String::from_utf8_lossy(&value).into_owned();

            if let Some(pseudo_name) = name.strip_prefix(':') {
                assign_pseudo(&mut out.pseudo, pseudo_name, &value);
            } else {
                out.fields.push(Header { name, value });
            }
        }
        Ok(out)
    }
}

fn assign_pseudo(pseudo: &mut PseudoHeaders, name: &str, value: &str) {
    match name {
        "method" => pseudo.method = Some(value.to_string()),
        "scheme" => pseudo.scheme = Some(value.to_string()),
        "authority" => pseudo.authority = Some(value.to_string()),
        "path" => pseudo.path = Some(value.to_string()),
        "protocol" => pseudo.protocol = Some(value.to_string()),
        "status" => pseudo.status = value.parse().ok(),
        _ => {} // unknown pseudo-header, ignored
    }
}

pub struct HpackEncoder {
    inner: fluke_hpack::Encoder<'static>,
}

impl HpackEncoder {
    pub fn new() -> HpackEncoder {
        HpackEncoder {
            inner: fluke_hpack::Encoder::new(),
        }
    }

    /// Encodes a request header block. Pseudo-headers are emitted first,
    /// in the order RFC 7540 §8.1.2.1 recommends, followed by the regular
    /// fields in caller-supplied order.
    pub fn encode_request(&mut self, pseudo: &PseudoHeaders, fields: &[(String, String)]) -> Vec<u8> {
        let mut pairs: Vec<(&[u8], &[u8])> = Vec::with_capacity(fields.len() + 4);

        if let Some(m) = &pseudo.method {
            pairs.push((b":method", m.as_bytes()));
        }
        if let Some(s) = &pseudo.scheme {
            pairs.push((b":scheme", s.as_bytes()));
        }
        if let Some(a) = &pseudo.authority {
            pairs.push((b":authority", a.as_bytes()));
        }
        if let Some(p) = &pseudo.path {
            pairs.push((b":path", p.as_bytes()));
        }
        if let Some(p) = &pseudo.protocol {
            pairs.push((b":protocol", p.as_bytes()));
        }
        for (name, value) in fields {
            pairs.push((name.as_bytes(), value.as_bytes()));
        }

        self.inner.encode(pairs)
    }
}

impl Default for HpackEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips_through_encoder_and_decoder() {
        let mut encoder = HpackEncoder::new();
        let pseudo = PseudoHeaders::request("GET", "https", "example.com", "/");
        let block = encoder.encode_request(&pseudo, &[("accept".into(), "*/*".into())]);

        let mut decoder = HpackDecoder::new(16 * 1024);
        let decoded = decoder.decode(&block).unwrap();

        assert_eq!(decoded.pseudo.method.as_deref(), Some("GET"));
        assert_eq!(decoded.pseudo.path.as_deref(), Some("/"));
        assert_eq!(decoded.fields[0].name, "accept");
        assert_eq!(decoded.fields[0].value, "*/*");
    }

    #[test]
    fn oversized_header_list_is_rejected() {
        let mut encoder = HpackEncoder::new();
        let pseudo = PseudoHeaders::request("GET", "https", "example.com", "/");
        let big_value = "x".repeat(200);
        let block = encoder.encode_request(&pseudo, &[("x-big".into(), big_value)]);

        let mut decoder = HpackDecoder::new(64);
        assert!(decoder.decode(&block).is_err());
    }
}
