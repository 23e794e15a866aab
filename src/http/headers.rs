//! Decoded header lists

use super::MAX_HEADERS;
use std::fmt;

/// Header fields of one request or response, in the order received
///
/// Pseudo-headers (`:path`, `:status`, ...) are kept inline with the
/// regular fields. Lookups ignore ASCII case. Fields past `MAX_HEADERS`
/// are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    fields: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Headers::default()
    }

    /// Append a field; repeated names keep every value
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        if self.fields.len() < MAX_HEADERS {
            self.fields.push((name.into(), value.into()));
        }
    }

    /// First value of `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.iter()
            .find_map(|(n, v)| n.eq_ignore_ascii_case(name).then_some(v))
    }

    pub fn path(&self) -> Option<&str> {
        self.get(":path")
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

/// `{ ":path": "/post", "user-agent": "curl" }`
impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        let mut sep = " ";
        for (name, value) in self.iter() {
            write!(f, "{}{:?}: {:?}", sep, name, value)?;
            sep = ", ";
        }
        f.write_str(" }")
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut headers = Headers::new();
        iter.into_iter()
            .for_each(|(name, value)| headers.insert(name, value));
        headers
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for Headers {
    fn from_iter<T: IntoIterator<Item = (&'a str, &'a str)>>(iter: T) -> Self {
        iter.into_iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect()
    }
}
