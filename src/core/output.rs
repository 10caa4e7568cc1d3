//! Comment serialization
//!
//! JSON: `{"count": n, "comments": [{"cid", "p": "time,mode,color,[source]", "m"}]}`
//! XML: bilibili-style `<i><d p="time,mode,25,color,0,0,source,cid">text</d></i>`

use crate::core::error::{AggregatorError, Result};
use crate::core::models::Comment;
use quick_xml::se::to_string;
use serde::Serialize;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Xml,
}

impl OutputFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            OutputFormat::Json => "application/json; charset=utf-8",
            OutputFormat::Xml => "application/xml; charset=utf-8",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = AggregatorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "xml" => Ok(OutputFormat::Xml),
            other => Err(AggregatorError::InvalidRequest(format!(
                "Unsupported format '{}', expected json or xml",
                other
            ))),
        }
    }
}

#[derive(Serialize)]
struct JsonPayload<'a> {
    count: usize,
    comments: Vec<JsonComment<'a>>,
}

#[derive(Serialize)]
struct JsonComment<'a> {
    cid: u64,
    p: String,
    m: &'a str,
}

#[derive(Serialize)]
#[serde(rename = "i")]
struct XmlDocument<'a> {
    #[serde(rename = "d")]
    comments: Vec<XmlComment<'a>>,
}

#[derive(Serialize)]
struct XmlComment<'a> {
    #[serde(rename = "@p")]
    p: String,
    #[serde(rename = "$text")]
    text: &'a str,
}

/// Serialize comments in the requested format
pub fn render(comments: &[Comment], format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => to_json(comments),
        OutputFormat::Xml => to_xml(comments),
    }
}

pub fn to_json(comments: &[Comment]) -> Result<String> {
    let payload = JsonPayload {
        count: comments.len(),
        comments: comments
            .iter()
            .map(|c| JsonComment {
                cid: c.cid,
                p: format!("{:.2},{},{},[{}]", c.time, c.mode.code(), c.color, c.source_tag),
                m: &c.text,
            })
            .collect(),
    };

    serde_json::to_string(&payload).map_err(|e| {
        AggregatorError::SerializationError(format!("Failed to serialize comments: {}", e))
    })
}

pub fn to_xml(comments: &[Comment]) -> Result<String> {
    let document = XmlDocument {
        comments: comments
            .iter()
            .map(|c| XmlComment {
                p: format!(
                    "{:.2},{},25,{},0,0,{},{}",
                    c.time,
                    c.mode.code(),
                    c.color,
                    c.source_tag,
                    c.cid
                ),
                text: &c.text,
            })
            .collect(),
    };

    let xml = to_string(&document).map_err(|e| {
        AggregatorError::SerializationError(format!("Failed to serialize comments: {}", e))
    })?;

    Ok(format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{}", xml))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::CommentMode;

    fn sample() -> Vec<Comment> {
        let mut first = Comment::new(1.5, CommentMode::Top, 0xFF0000, "a<b&c").with_source("bilibili");
        first.cid = 0;
        let mut second = Comment::new(12.346, CommentMode::Scroll, 0xFFFFFF, "好").with_source("renren");
        second.cid = 1;
        vec![first, second]
    }

    #[test]
    fn test_json_shape() {
        let json = to_json(&sample()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["count"], 2);
        assert_eq!(value["comments"][0]["cid"], 0);
        assert_eq!(value["comments"][0]["p"], "1.50,5,16711680,[bilibili]");
        assert_eq!(value["comments"][0]["m"], "a<b&c");
        assert_eq!(value["comments"][1]["p"], "12.35,1,16777215,[renren]");
    }

    #[test]
    fn test_xml_shape_and_escaping() {
        let xml = to_xml(&sample()).unwrap();
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<i>"));
        assert!(xml.contains(r#"<d p="1.50,5,25,16711680,0,0,bilibili,0">a&lt;b&amp;c</d>"#));
        assert!(xml.contains(r#"<d p="12.35,1,25,16777215,0,0,renren,1">好</d>"#));
        assert!(xml.ends_with("</i>"));
    }

    #[test]
    fn test_output_is_byte_identical_across_runs() {
        let comments = sample();
        assert_eq!(to_json(&comments).unwrap(), to_json(&comments).unwrap());
        assert_eq!(to_xml(&comments).unwrap(), to_xml(&comments).unwrap());
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("XML".parse::<OutputFormat>().unwrap(), OutputFormat::Xml);
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert!("yaml".parse::<OutputFormat>().is_err());
    }
}
