//! URI addressing for the mesh/part/host/node hierarchy.
//!
//! A [`Uri`] is `[scheme ":"] ["//" authority] path`, kept in parsed-part
//! form with a canonical text rendering. Every addressing map except the
//! part map (which keys by partition [`Term`](crate::term::Term)) keys by
//! `Uri`.

use std::fmt;
use std::str::FromStr;

use nom::branch::alt;
use nom::bytes::complete::{tag, take_while, take_while1};
use nom::character::complete::alpha1;
use nom::combinator::{all_consuming, opt, recognize};
use nom::sequence::{pair, preceded, terminated};
use nom::IResult;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("malformed uri '{input}' at offset {at}")]
pub struct UriParseErr {
    pub input: String,
    pub at: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Uri {
    scheme: Option<String>,
    authority: Option<String>,
    path: String,
}

fn scheme(input: &str) -> IResult<&str, &str> {
    terminated(
        recognize(pair(
            alpha1,
            take_while(|c: char| c.is_ascii_alphanumeric() || "+-.".contains(c)),
        )),
        tag(":"),
    )(input)
}

fn authority(input: &str) -> IResult<&str, &str> {
    preceded(
        tag("//"),
        take_while1(|c: char| c != '/' && !c.is_whitespace()),
    )(input)
}

fn path(input: &str) -> IResult<&str, &str> {
    take_while(|c: char| !c.is_whitespace())(input)
}

fn uri(input: &str) -> IResult<&str, Uri> {
    let (input, scheme) = opt(scheme)(input)?;
    let (input, authority) = opt(authority)(input)?;
    let (input, path) = path(input)?;
    Ok((
        input,
        Uri {
            scheme: scheme.map(str::to_string),
            authority: authority.map(str::to_string),
            path: path.to_string(),
        },
    ))
}

impl Uri {
    pub fn parse(input: &str) -> Result<Uri, UriParseErr> {
        match all_consuming(uri)(input) {
            Ok((_, uri)) => Ok(uri),
            Err(nom::Err::Error(err)) | Err(nom::Err::Failure(err)) => Err(UriParseErr {
                input: input.to_string(),
                at: input.len() - err.input.len(),
            }),
            Err(nom::Err::Incomplete(_)) => Err(UriParseErr {
                input: input.to_string(),
                at: input.len(),
            }),
        }
    }

    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    pub fn authority(&self) -> Option<&str> {
        self.authority.as_deref()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Path segments, empty leading segment elided.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.path.split('/').filter(|segment| !segment.is_empty())
    }

    /// The host address of this uri: scheme and authority with the path
    /// dropped.
    pub fn to_host(&self) -> Uri {
        Uri {
            scheme: self.scheme.clone(),
            authority: self.authority.clone(),
            path: String::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.scheme.is_none() && self.authority.is_none() && self.path.is_empty()
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(scheme) = &self.scheme {
            write!(f, "{}:", scheme)?;
        }
        if let Some(authority) = &self.authority {
            write!(f, "//{}", authority)?;
        }
        write!(f, "{}", self.path)
    }
}

impl FromStr for Uri {
    type Err = UriParseErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uri::parse(s)
    }
}

impl TryFrom<String> for Uri {
    type Error = UriParseErr;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Uri::parse(&value)
    }
}

impl From<Uri> for String {
    fn from(uri: Uri) -> Self {
        uri.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_form() {
        let uri = Uri::parse("warp://example.com/unit/3").unwrap();
        assert_eq!(uri.scheme(), Some("warp"));
        assert_eq!(uri.authority(), Some("example.com"));
        assert_eq!(uri.path(), "/unit/3");
        assert_eq!(uri.segments().collect::<Vec<_>>(), vec!["unit", "3"]);
        assert_eq!(uri.to_string(), "warp://example.com/unit/3");
    }

    #[test]
    fn bare_path() {
        let uri = Uri::parse("/gauge/1").unwrap();
        assert_eq!(uri.scheme(), None);
        assert_eq!(uri.authority(), None);
        assert_eq!(uri.path(), "/gauge/1");
    }

    #[test]
    fn whitespace_rejected() {
        let err = Uri::parse("warp://host/a b").unwrap_err();
        assert_eq!(err.at, "warp://host/a".len());
    }

    #[test]
    fn round_trips_through_text() {
        for text in ["warp://host", "mesh:", "", "/x/y/z", "warp://h/p"] {
            let uri = Uri::parse(text).unwrap();
            assert_eq!(uri.to_string(), text);
            assert_eq!(Uri::parse(&uri.to_string()).unwrap(), uri);
        }
    }
}
