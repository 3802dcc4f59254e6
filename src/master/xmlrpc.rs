//! XML-RPC codec
//!
//! Just enough of the protocol for the master API: calls carry string
//! parameters, responses decode into [`XmlRpcValue`].

use crate::error::{Error, Result};
use roxmltree::{Document, Node};
use std::collections::BTreeMap;

/// A decoded XML-RPC value
#[derive(Debug, Clone, PartialEq)]
pub enum XmlRpcValue {
    Int(i64),
    Bool(bool),
    Str(String),
    Double(f64),
    Array(Vec<XmlRpcValue>),
    Struct(BTreeMap<String, XmlRpcValue>),
    Nil,
}

impl XmlRpcValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            XmlRpcValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            XmlRpcValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[XmlRpcValue]> {
        match self {
            XmlRpcValue::Array(items) => Some(items),
            _ => None,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            XmlRpcValue::Int(_) => "int",
            XmlRpcValue::Bool(_) => "boolean",
            XmlRpcValue::Str(_) => "string",
            XmlRpcValue::Double(_) => "double",
            XmlRpcValue::Array(_) => "array",
            XmlRpcValue::Struct(_) => "struct",
            XmlRpcValue::Nil => "nil",
        }
    }

    /// Borrow as an array, or fail naming what was expected
    pub fn expect_array(&self, what: &str) -> Result<&[XmlRpcValue]> {
        self.as_array().ok_or_else(|| {
            Error::Protocol(format!("{}: expected array, got {}", what, self.kind()))
        })
    }

    pub fn expect_str(&self, what: &str) -> Result<&str> {
        self.as_str().ok_or_else(|| {
            Error::Protocol(format!("{}: expected string, got {}", what, self.kind()))
        })
    }
}

// =============================================================================
// Encoding
// =============================================================================

/// Encode a `methodCall` whose parameters are all strings
pub fn encode_call(method: &str, params: &[&str]) -> String {
    let mut body = String::with_capacity(128 + params.iter().map(|p| p.len() + 48).sum::<usize>());
    body.push_str("<?xml version=\"1.0\"?>\n<methodCall><methodName>");
    body.push_str(&escape(method));
    body.push_str("</methodName><params>");
    for param in params {
        body.push_str("<param><value><string>");
        body.push_str(&escape(param));
        body.push_str("</string></value></param>");
    }
    body.push_str("</params></methodCall>\n");
    body
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

// =============================================================================
// Decoding
// =============================================================================

/// Decode a `methodResponse` into its single return value
///
/// A `<fault>` response becomes a protocol error carrying the fault string.
pub fn decode_response(xml: &str) -> Result<XmlRpcValue> {
    let doc = Document::parse(xml)
        .map_err(|e| Error::Protocol(format!("malformed XML-RPC response: {}", e)))?;

    let root = doc.root_element();
    if root.tag_name().name() != "methodResponse" {
        return Err(Error::Protocol(format!(
            "expected methodResponse, got <{}>",
            root.tag_name().name()
        )));
    }

    if let Some(fault) = child(root, "fault") {
        let value = child(fault, "value")
            .map(decode_value)
            .transpose()?
            .unwrap_or(XmlRpcValue::Nil);
        let (code, message) = match &value {
            XmlRpcValue::Struct(members) => (
                members.get("faultCode").and_then(XmlRpcValue::as_i64),
                members
                    .get("faultString")
                    .and_then(XmlRpcValue::as_str)
                    .unwrap_or_default()
                    .to_string(),
            ),
            _ => (None, String::new()),
        };
        return Err(Error::Protocol(format!(
            "XML-RPC fault {}: {}",
            code.map_or_else(|| "?".to_string(), |c| c.to_string()),
            message
        )));
    }

    let value = child(root, "params")
        .and_then(|params| child(params, "param"))
        .and_then(|param| child(param, "value"))
        .ok_or_else(|| Error::Protocol("response carries no value".to_string()))?;
    decode_value(value)
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == name)
}

fn decode_value(value: Node) -> Result<XmlRpcValue> {
    // Untyped values are strings
    let Some(typed) = value.children().find(|n| n.is_element()) else {
        return Ok(XmlRpcValue::Str(value.text().unwrap_or_default().to_string()));
    };
    let text = typed.text().unwrap_or_default().trim();

    let decoded = match typed.tag_name().name() {
        "int" | "i4" | "i8" => XmlRpcValue::Int(
            text.parse()
                .map_err(|_| Error::Protocol(format!("invalid int '{}'", text)))?,
        ),
        "boolean" => match text {
            "1" => XmlRpcValue::Bool(true),
            "0" => XmlRpcValue::Bool(false),
            other => return Err(Error::Protocol(format!("invalid boolean '{}'", other))),
        },
        "double" => XmlRpcValue::Double(
            text.parse()
                .map_err(|_| Error::Protocol(format!("invalid double '{}'", text)))?,
        ),
        // Strings keep their whitespace
        "string" => XmlRpcValue::Str(typed.text().unwrap_or_default().to_string()),
        "dateTime.iso8601" | "base64" => XmlRpcValue::Str(text.to_string()),
        "nil" => XmlRpcValue::Nil,
        "array" => {
            let items = match child(typed, "data") {
                Some(data) => data
                    .children()
                    .filter(|n| n.is_element() && n.tag_name().name() == "value")
                    .map(decode_value)
                    .collect::<Result<Vec<_>>>()?,
                None => Vec::new(),
            };
            XmlRpcValue::Array(items)
        }
        "struct" => {
            let mut members = BTreeMap::new();
            for member in typed
                .children()
                .filter(|n| n.is_element() && n.tag_name().name() == "member")
            {
                let name = child(member, "name")
                    .and_then(|n| n.text())
                    .ok_or_else(|| Error::Protocol("struct member without name".to_string()))?;
                let value = child(member, "value")
                    .ok_or_else(|| Error::Protocol(format!("struct member '{}' without value", name)))?;
                members.insert(name.to_string(), decode_value(value)?);
            }
            XmlRpcValue::Struct(members)
        }
        other => return Err(Error::Protocol(format!("unsupported value type <{}>", other))),
    };
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_encode_call_escapes() {
        let body = encode_call("lookupNode", &["/rosgraph_cache", "a<b&c"]);
        assert!(body.contains("<methodName>lookupNode</methodName>"));
        assert!(body.contains("<string>/rosgraph_cache</string>"));
        assert!(body.contains("<string>a&lt;b&amp;c</string>"));
        assert!(Document::parse(&body).is_ok());
    }

    #[test]
    fn test_decode_lookup_response() {
        let xml = r#"<?xml version="1.0"?>
<methodResponse><params><param><value><array><data>
  <value><int>1</int></value>
  <value><string>node api</string></value>
  <value>http://10.0.0.1:9/</value>
</data></array></value></param></params></methodResponse>"#;

        let value = decode_response(xml).unwrap();
        assert_eq!(
            value,
            XmlRpcValue::Array(vec![
                XmlRpcValue::Int(1),
                XmlRpcValue::Str("node api".into()),
                XmlRpcValue::Str("http://10.0.0.1:9/".into()),
            ])
        );
    }

    #[test]
    fn test_decode_nested_and_scalars() {
        let xml = r#"<methodResponse><params><param><value><struct>
  <member><name>ok</name><value><boolean>1</boolean></value></member>
  <member><name>rate</name><value><double>2.5</double></value></member>
  <member><name>empty</name><value><array><data/></array></value></member>
  <member><name>none</name><value><nil/></value></member>
</struct></value></param></params></methodResponse>"#;

        let XmlRpcValue::Struct(members) = decode_response(xml).unwrap() else {
            panic!("expected struct");
        };
        assert_eq!(members["ok"], XmlRpcValue::Bool(true));
        assert_eq!(members["rate"], XmlRpcValue::Double(2.5));
        assert_eq!(members["empty"], XmlRpcValue::Array(vec![]));
        assert_eq!(members["none"], XmlRpcValue::Nil);
    }

    #[test]
    fn test_decode_fault() {
        let xml = r#"<methodResponse><fault><value><struct>
  <member><name>faultCode</name><value><int>-1</int></value></member>
  <member><name>faultString</name><value><string>no such method</string></value></member>
</struct></value></fault></methodResponse>"#;

        let err = decode_response(xml).unwrap_err();
        assert_matches!(err, Error::Protocol(msg) if msg.contains("no such method"));
    }

    #[test]
    fn test_decode_malformed() {
        assert_matches!(decode_response("<methodResponse>"), Err(Error::Protocol(_)));
        assert_matches!(decode_response("<methodCall/>"), Err(Error::Protocol(_)));
        assert_matches!(
            decode_response("<methodResponse><params/></methodResponse>"),
            Err(Error::Protocol(_))
        );
        assert_matches!(
            decode_response(
                "<methodResponse><params><param><value><int>x</int></value></param></params></methodResponse>"
            ),
            Err(Error::Protocol(_))
        );
    }
}
