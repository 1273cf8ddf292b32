//! Canonical TogoWS request targets.
//!
//! Everything here is pure: the same inputs always produce the same URL, and
//! malformed parameters are rejected before a request exists.

use std::fmt;

use crate::error::{Result, TogoError};

pub const DEFAULT_BASE_URL: &str = "http://togows.dbcls.jp";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Fetch,
    Search,
    SearchCount,
    Convert,
    Discovery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// A fully built request: method, absolute URL and (for convert) form body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub operation: Operation,
    pub method: Method,
    pub url: String,
    pub form: Vec<(String, String)>,
}

impl Request {
    fn get(operation: Operation, url: String) -> Self {
        Self {
            operation,
            method: Method::Get,
            url,
            form: Vec::new(),
        }
    }
}

/// A one-based search result window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    offset: u64,
    count: u64,
}

impl Window {
    pub fn new(offset: u64, count: u64) -> Result<Self> {
        if offset == 0 {
            return Err(TogoError::input("offset should be at least one"));
        }
        if count == 0 {
            return Err(TogoError::input("count should be at least one"));
        }
        Ok(Self { offset, count })
    }

    /// Validate a raw caller-supplied offset/count pair.
    ///
    /// Both or neither must be given; given values must be positive.
    pub fn from_parts(offset: Option<i64>, count: Option<i64>) -> Result<Option<Self>> {
        match (offset, count) {
            (None, None) => Ok(None),
            (Some(offset), Some(count)) => {
                if offset <= 0 {
                    return Err(TogoError::input("offset should be at least one"));
                }
                if count <= 0 {
                    return Err(TogoError::input("count should be at least one"));
                }
                Self::new(offset as u64, count as u64).map(Some)
            }
            _ => Err(TogoError::input(
                "expected both offset and count to be provided (or neither)",
            )),
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.offset, self.count)
    }
}

/// An ordered list of entry identifiers.
///
/// Built from a comma-delimited string or any sequence of strings; both forms
/// normalize to the same comma-joined list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identifiers(Vec<String>);

impl Identifiers {
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn joined(&self) -> String {
        self.0.join(",")
    }

    fn from_iter_str<'a>(items: impl IntoIterator<Item = &'a str>) -> Self {
        Self(
            items
                .into_iter()
                .flat_map(|s| s.split(','))
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
        )
    }
}

impl From<&str> for Identifiers {
    fn from(s: &str) -> Self {
        Self::from_iter_str([s])
    }
}

impl From<String> for Identifiers {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<&String> for Identifiers {
    fn from(s: &String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<&[&str]> for Identifiers {
    fn from(items: &[&str]) -> Self {
        Self::from_iter_str(items.iter().copied())
    }
}

impl<const N: usize> From<[&str; N]> for Identifiers {
    fn from(items: [&str; N]) -> Self {
        Self::from_iter_str(items)
    }
}

impl From<Vec<&str>> for Identifiers {
    fn from(items: Vec<&str>) -> Self {
        Self::from_iter_str(items)
    }
}

impl From<&[String]> for Identifiers {
    fn from(items: &[String]) -> Self {
        Self::from_iter_str(items.iter().map(String::as_str))
    }
}

impl From<Vec<String>> for Identifiers {
    fn from(items: Vec<String>) -> Self {
        Self::from(items.as_slice())
    }
}

/// Builds request targets against one service base URL.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    base_url: String,
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl RequestBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /entry/{db}/{ids}[/{field}][.{format}]`
    pub fn entry(
        &self,
        db: &str,
        ids: &Identifiers,
        field: Option<&str>,
        format: Option<&str>,
    ) -> Result<Request> {
        let db = required("database", db)?;
        if ids.is_empty() {
            return Err(TogoError::input("at least one identifier is required"));
        }
        let ids = ids
            .as_slice()
            .iter()
            .map(|id| encode(id))
            .collect::<Vec<_>>()
            .join(",");

        let mut url = format!("{}/entry/{}/{}", self.base_url, encode(db), ids);
        if let Some(field) = non_empty(field) {
            url.push('/');
            url.push_str(&encode(field));
        }
        push_format(&mut url, format);
        Ok(Request::get(Operation::Fetch, url))
    }

    /// `GET /search/{db}/{query}[/{offset},{count}][.{format}]`
    pub fn search(
        &self,
        db: &str,
        query: &str,
        window: Option<Window>,
        format: Option<&str>,
    ) -> Result<Request> {
        let mut url = self.search_base(db, query)?;
        if let Some(window) = window {
            url.push('/');
            url.push_str(&window.to_string());
        }
        push_format(&mut url, format);
        Ok(Request::get(Operation::Search, url))
    }

    /// `GET /search/{db}/{query}/count`
    pub fn search_count(&self, db: &str, query: &str) -> Result<Request> {
        let mut url = self.search_base(db, query)?;
        url.push_str("/count");
        Ok(Request::get(Operation::SearchCount, url))
    }

    /// `POST /convert/{in}.{out}` with the record text in form field `data`.
    pub fn convert(
        &self,
        data: impl Into<String>,
        in_format: &str,
        out_format: &str,
    ) -> Result<Request> {
        let in_format = required("input format", in_format)?;
        let out_format = required("output format", out_format)?;
        Ok(Request {
            operation: Operation::Convert,
            method: Method::Post,
            url: format!(
                "{}/convert/{}.{}",
                self.base_url,
                encode(in_format),
                encode(out_format)
            ),
            form: vec![("data".to_string(), data.into())],
        })
    }

    /// `GET /entry`
    pub fn entry_databases(&self) -> Request {
        Request::get(Operation::Discovery, format!("{}/entry", self.base_url))
    }

    /// `GET /search`
    pub fn search_databases(&self) -> Request {
        Request::get(Operation::Discovery, format!("{}/search", self.base_url))
    }

    /// `GET /entry/{db}?fields`
    pub fn entry_fields(&self, db: &str) -> Result<Request> {
        let db = required("database", db)?;
        Ok(Request::get(
            Operation::Discovery,
            format!("{}/entry/{}?fields", self.base_url, encode(db)),
        ))
    }

    /// `GET /entry/{db}?formats`
    pub fn entry_formats(&self, db: &str) -> Result<Request> {
        let db = required("database", db)?;
        Ok(Request::get(
            Operation::Discovery,
            format!("{}/entry/{}?formats", self.base_url, encode(db)),
        ))
    }

    fn search_base(&self, db: &str, query: &str) -> Result<String> {
        let db = required("database", db)?;
        let query = required("query", query)?;
        Ok(format!(
            "{}/search/{}/{}",
            self.base_url,
            encode(db),
            encode_query(query)
        ))
    }
}

fn required<'a>(what: &str, value: &'a str) -> Result<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        Err(TogoError::input(format!("{what} must not be empty")))
    } else {
        Ok(value)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn push_format(url: &mut String, format: Option<&str>) {
    if let Some(format) = non_empty(format) {
        url.push('.');
        url.push_str(&encode(format));
    }
}

fn encode(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}

/// `+` separates search terms, so it stays literal between encoded terms.
fn encode_query(query: &str) -> String {
    query.split('+').map(encode).collect::<Vec<_>>().join("+")
}
