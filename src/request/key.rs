//! Cache keys, URL splitting and body encoding.

use std::borrow::Cow;
use std::collections::BTreeMap;

use serde::Deserialize;
use url::{form_urlencoded, Url};

use super::Method;
use crate::error::{Error, Result};

/// Derive the cache key for a request.
///
/// `"{METHOD}:{path}"`, followed by `?` and the parameters sorted by name as
/// `name=value` pairs joined with `&`. Parameter insertion order never
/// matters, so identical logical requests share one cache slot.
///
/// Names and values are left as is except for `%`, `&` and `=`, which are
/// percent-escaped so distinct parameter sets never share a key.
pub fn cache_key(method: Method, path: &str, params: &BTreeMap<String, String>) -> String {
  let mut key = format!("{}:{}", method.as_str(), path);
  if !params.is_empty() {
    key.push('?');
    let query = params
      .iter()
      .map(|(name, value)| format!("{}={}", escape_key_part(name), escape_key_part(value)))
      .collect::<Vec<_>>()
      .join("&");
    key.push_str(&query);
  }
  key
}

fn escape_key_part(s: &str) -> Cow<'_, str> {
  if !s.contains(&['%', '&', '='][..]) {
    return Cow::Borrowed(s);
  }
  let mut escaped = String::with_capacity(s.len() + 4);
  for c in s.chars() {
    match c {
      '%' => escaped.push_str("%25"),
      '&' => escaped.push_str("%26"),
      '=' => escaped.push_str("%3D"),
      _ => escaped.push(c),
    }
  }
  Cow::Owned(escaped)
}

/// Split a request URL into its query-less part and its query pairs.
///
/// API paths stay relative (`/v2/offers`); absolute URLs keep scheme and host.
pub fn split_url(raw: &str) -> Result<(String, Vec<(String, String)>)> {
  let invalid = |reason: String| Error::InvalidUrl {
    url: raw.to_string(),
    reason,
  };

  if raw.trim().is_empty() {
    return Err(invalid("empty URL".to_string()));
  }

  let absolute = raw.starts_with("http://") || raw.starts_with("https://");
  let parsed = if absolute {
    Url::parse(raw)
  } else {
    Url::parse("http://localhost").and_then(|base| base.join(raw))
  }
  .map_err(|e| invalid(e.to_string()))?;

  let pairs: Vec<(String, String)> = parsed.query_pairs().into_owned().collect();

  let base = if absolute {
    let mut stripped = parsed.clone();
    stripped.set_query(None);
    stripped.set_fragment(None);
    stripped.to_string()
  } else {
    parsed.path().to_string()
  };

  Ok((base, pairs))
}

/// Character encoding for urlencoded POST/PUT bodies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum ParamsEncoding {
  #[default]
  #[serde(rename = "utf-8", alias = "utf8")]
  Utf8,
  #[serde(rename = "iso-8859-1", alias = "latin1")]
  Iso88591,
}

impl ParamsEncoding {
  pub fn charset(&self) -> &'static str {
    match self {
      ParamsEncoding::Utf8 => "utf-8",
      ParamsEncoding::Iso88591 => "iso-8859-1",
    }
  }

  pub fn content_type(&self) -> String {
    format!("application/x-www-form-urlencoded; charset={}", self.charset())
  }
}

/// Characters outside Latin-1 have no encoding and become `?`.
fn encode_latin1(s: &str) -> Cow<'_, [u8]> {
  if s.is_ascii() {
    return Cow::Borrowed(s.as_bytes());
  }
  Cow::Owned(
    s.chars()
      .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
      .collect(),
  )
}

/// Encode parameters as an `application/x-www-form-urlencoded` string.
pub fn encode_params(params: &BTreeMap<String, String>, encoding: ParamsEncoding) -> String {
  let mut serializer = form_urlencoded::Serializer::new(String::new());
  if encoding == ParamsEncoding::Iso88591 {
    serializer.encoding_override(Some(&encode_latin1));
  }
  for (name, value) in params {
    serializer.append_pair(name, value);
  }
  serializer.finish()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect()
  }

  #[test]
  fn test_cache_key_ignores_insertion_order() {
    let a = params(&[("offer_ids", "A,B"), ("limit", "25"), ("offset", "0")]);
    let b = params(&[("offset", "0"), ("offer_ids", "A,B"), ("limit", "25")]);
    assert_eq!(
      cache_key(Method::Get, "/v2/offers", &a),
      cache_key(Method::Get, "/v2/offers", &b)
    );
  }

  #[test]
  fn test_cache_key_is_bit_exact() {
    let p = params(&[("offer_ids", "A,B")]);
    assert_eq!(
      cache_key(Method::Get, "/v2/offers", &p),
      "GET:/v2/offers?offer_ids=A,B"
    );
    assert_eq!(
      cache_key(Method::Get, "/v2/stores/s1", &BTreeMap::new()),
      "GET:/v2/stores/s1"
    );
  }

  #[test]
  fn test_cache_key_escapes_separators() {
    let joined = params(&[("a", "1&b=2")]);
    let split = params(&[("a", "1"), ("b", "2")]);
    let joined_key = cache_key(Method::Get, "/v2/offers", &joined);
    assert_eq!(joined_key, "GET:/v2/offers?a=1%26b%3D2");
    assert_ne!(joined_key, cache_key(Method::Get, "/v2/offers", &split));

    let percent = params(&[("q", "50%"), ("x=y", "A,B")]);
    assert_eq!(
      cache_key(Method::Get, "/v2/offers", &percent),
      "GET:/v2/offers?q=50%25&x%3Dy=A,B"
    );
  }

  #[test]
  fn test_cache_key_includes_method() {
    let p = BTreeMap::new();
    assert_ne!(
      cache_key(Method::Get, "/v2/sessions", &p),
      cache_key(Method::Put, "/v2/sessions", &p)
    );
  }

  #[test]
  fn test_split_relative_url_with_query() {
    let (path, pairs) = split_url("/v2/offers?offer_ids=A,B&limit=5").unwrap();
    assert_eq!(path, "/v2/offers");
    assert_eq!(
      pairs,
      vec![
        ("offer_ids".to_string(), "A,B".to_string()),
        ("limit".to_string(), "5".to_string())
      ]
    );
  }

  #[test]
  fn test_split_absolute_url() {
    let (base, pairs) = split_url("https://api.etilbudsavis.dk/v2/stores#top").unwrap();
    assert_eq!(base, "https://api.etilbudsavis.dk/v2/stores");
    assert!(pairs.is_empty());
  }

  #[test]
  fn test_split_malformed_url() {
    assert!(matches!(split_url(""), Err(Error::InvalidUrl { .. })));
    assert!(matches!(
      split_url("https://exa mple.com/v2"),
      Err(Error::InvalidUrl { .. })
    ));
  }

  #[test]
  fn test_encode_params_utf8() {
    let p = params(&[("name", "Søren & co"), ("email", "a@b.dk")]);
    assert_eq!(
      encode_params(&p, ParamsEncoding::Utf8),
      "email=a%40b.dk&name=S%C3%B8ren+%26+co"
    );
  }

  #[test]
  fn test_encoding_names_from_config() {
    for (name, expected) in [
      ("utf-8", ParamsEncoding::Utf8),
      ("utf8", ParamsEncoding::Utf8),
      ("iso-8859-1", ParamsEncoding::Iso88591),
      ("latin1", ParamsEncoding::Iso88591),
    ] {
      let parsed: ParamsEncoding = serde_yaml::from_str(name).unwrap();
      assert_eq!(parsed, expected, "{}", name);
    }
    assert!(serde_yaml::from_str::<ParamsEncoding>("utf-16").is_err());
  }

  #[test]
  fn test_encode_params_latin1() {
    let p = params(&[("name", "Søren")]);
    assert_eq!(encode_params(&p, ParamsEncoding::Iso88591), "name=S%F8ren");
  }
}
