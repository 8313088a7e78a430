//! Sender, recipient and username grammar.
//!
//! Addresses are accepted in the RFC 5321 dot-string form with either a
//! domain name or a bracketed address literal (`[192.0.2.1]`,
//! `[IPv6:2001:db8::1]`).

use core::fmt::{self, Display, Formatter};
use std::{
    net::{Ipv4Addr, Ipv6Addr},
    sync::LazyLock,
};

use regex::Regex;
use thiserror::Error;

/// Largest `SIZE=` value honoured, anything above is ignored.
pub const MAX_DECLARED_SIZE: u64 = 2_147_483_647;

const MAX_LOCAL_PART: usize = 64;
const MAX_DOMAIN: usize = 255;

#[allow(clippy::unwrap_used, reason = "The pattern is a literal")]
static USERNAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9]+([._-]?[a-zA-Z0-9]+)*$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("Empty address")]
    Empty,
    #[error("Missing ':' separator")]
    MissingSeparator,
    #[error("Missing '@' separator in mailbox")]
    MissingAtSign,
    #[error("Local-part exceeds 64 octets")]
    LocalPartTooLong,
    #[error("Domain exceeds 255 octets")]
    DomainTooLong,
    #[error("Invalid local-part: {0}")]
    InvalidLocalPart(String),
    #[error("Invalid domain: {0}")]
    InvalidDomain(String),
    #[error("Invalid address literal: {0}")]
    InvalidAddressLiteral(String),
}

/// A `local@domain` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Mailbox {
    pub local: String,
    pub domain: String,
}

impl Mailbox {
    /// Parse a bare mailbox, without angle brackets.
    ///
    /// # Errors
    /// If either half does not match the address grammar
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        let input = input.trim();

        if input.is_empty() {
            return Err(AddressError::Empty);
        }

        let (local, domain) = input.rsplit_once('@').ok_or(AddressError::MissingAtSign)?;

        if local.len() > MAX_LOCAL_PART {
            return Err(AddressError::LocalPartTooLong);
        }

        validate_local_part(local)?;
        validate_domain(domain)?;

        Ok(Self {
            local: local.to_string(),
            domain: domain.to_string(),
        })
    }

    #[must_use]
    pub fn address(&self) -> String {
        self.to_string()
    }
}

impl Display for Mailbox {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}@{}", self.local, self.domain)
    }
}

/// The `BODY=` parameter of `MAIL FROM`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Body {
    SevenBit,
    #[default]
    EightBitMime,
}

impl Display for Body {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        fmt.write_str(match self {
            Self::SevenBit => "7BIT",
            Self::EightBitMime => "8BITMIME",
        })
    }
}

/// A parsed `MAIL FROM` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    pub mailbox: Mailbox,
    /// Declared message size, if one within range was given.
    pub size: Option<u32>,
    pub body: Body,
}

impl Sender {
    #[must_use]
    pub fn local(&self) -> &str {
        &self.mailbox.local
    }

    #[must_use]
    pub fn domain(&self) -> &str {
        &self.mailbox.domain
    }

    #[must_use]
    pub fn address(&self) -> String {
        self.mailbox.address()
    }
}

/// Split `MAIL FROM:<addr> PARAMS` into the address and its parameter text.
fn split_path(raw: &str) -> Result<(&str, &str), AddressError> {
    let (_, rest) = raw.split_once(':').ok_or(AddressError::MissingSeparator)?;
    let rest = rest.trim_start();

    let (address, params) = match rest.split_once('>') {
        Some((address, params)) => (address, params),
        None => rest.split_once(char::is_whitespace).unwrap_or((rest, "")),
    };

    Ok((address.trim().trim_start_matches('<').trim(), params))
}

/// Parse the raw `MAIL FROM` line.
///
/// `SIZE=` values above [`MAX_DECLARED_SIZE`], unsupported `BODY=` values and
/// unknown parameters are ignored.
///
/// # Errors
/// If the reverse path is not a valid mailbox
pub fn process_sender(raw: &str) -> Result<Sender, AddressError> {
    let (address, params) = split_path(raw)?;
    let mailbox = Mailbox::parse(address)?;

    let mut sender = Sender {
        mailbox,
        size: None,
        body: Body::default(),
    };

    for (key, value) in params
        .split_whitespace()
        .filter_map(|param| param.split_once('='))
    {
        match key.to_ascii_uppercase().as_str() {
            "SIZE" => {
                if let Ok(size) = value.parse::<u64>()
                    && size <= MAX_DECLARED_SIZE
                {
                    sender.size = u32::try_from(size).ok();
                }
            }
            "BODY" => match value.to_ascii_uppercase().as_str() {
                "7BIT" => sender.body = Body::SevenBit,
                "8BITMIME" => sender.body = Body::EightBitMime,
                _ => {}
            },
            _ => {}
        }
    }

    Ok(sender)
}

/// Parse the raw `RCPT TO` line.
///
/// # Errors
/// If the forward path is not a valid mailbox
pub fn process_recipient(raw: &str) -> Result<Mailbox, AddressError> {
    let (address, _) = split_path(raw)?;
    Mailbox::parse(address.trim_end_matches('>'))
}

/// Checks a display username as contributed by `VRFY` extensions: ASCII
/// alphanumeric runs joined by single `.`, `_` or `-` characters.
#[must_use]
pub fn validate_username(username: &str) -> bool {
    USERNAME.is_match(username)
}

const fn is_atext(ch: char) -> bool {
    ch.is_ascii_alphanumeric()
        || matches!(
            ch,
            '!' | '#'
                | '$'
                | '%'
                | '&'
                | '\''
                | '*'
                | '+'
                | '-'
                | '/'
                | '='
                | '?'
                | '^'
                | '_'
                | '`'
                | '{'
                | '|'
                | '}'
                | '~'
        )
}

fn validate_local_part(local: &str) -> Result<(), AddressError> {
    if local.is_empty() {
        return Err(AddressError::InvalidLocalPart("Empty local-part".to_string()));
    }

    if local.split('.').any(str::is_empty) {
        return Err(AddressError::InvalidLocalPart(format!(
            "Empty atom in '{local}'"
        )));
    }

    match local.chars().find(|ch| *ch != '.' && !is_atext(*ch)) {
        Some(ch) => Err(AddressError::InvalidLocalPart(format!(
            "Invalid character '{ch}'"
        ))),
        None => Ok(()),
    }
}

/// Checks a domain name or a bracketed address literal, as accepted after
/// `@` in a mailbox and as the argument of `HELO`/`EHLO`.
///
/// # Errors
/// If `domain` matches neither grammar
pub fn validate_domain(domain: &str) -> Result<(), AddressError> {
    if domain.len() > MAX_DOMAIN {
        return Err(AddressError::DomainTooLong);
    }

    if let Some(literal) = domain.strip_prefix('[') {
        return validate_address_literal(literal);
    }

    if domain.is_empty() {
        return Err(AddressError::InvalidDomain("Empty domain".to_string()));
    }

    for label in domain.split('.') {
        let valid = !label.is_empty()
            && label.len() <= 63
            && label.starts_with(|ch: char| ch.is_ascii_alphanumeric())
            && label.ends_with(|ch: char| ch.is_ascii_alphanumeric())
            && label.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '-');

        if !valid {
            return Err(AddressError::InvalidDomain(format!(
                "Invalid label '{label}' in '{domain}'"
            )));
        }
    }

    Ok(())
}

fn validate_address_literal(literal: &str) -> Result<(), AddressError> {
    let inner = literal
        .strip_suffix(']')
        .ok_or_else(|| AddressError::InvalidAddressLiteral(format!("[{literal}")))?;

    let valid = match inner.get(..5) {
        Some(tag) if tag.eq_ignore_ascii_case("IPv6:") => inner[5..].parse::<Ipv6Addr>().is_ok(),
        _ => inner.parse::<Ipv4Addr>().is_ok(),
    };

    if valid {
        Ok(())
    } else {
        Err(AddressError::InvalidAddressLiteral(format!("[{literal}")))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn sender_defaults() {
        let sender = process_sender("MAIL FROM:<user@domain.com>").unwrap();

        assert_eq!(sender.local(), "user");
        assert_eq!(sender.domain(), "domain.com");
        assert_eq!(sender.address(), "user@domain.com");
        assert_eq!(sender.size, None);
        assert_eq!(sender.body, Body::EightBitMime);
        assert_eq!(sender.body.to_string(), "8BITMIME");
    }

    #[test]
    fn sender_parameters() {
        let sender = process_sender("MAIL FROM: <user@domain.com> SIZE=1024 BODY=7bit").unwrap();
        assert_eq!(sender.size, Some(1024));
        assert_eq!(sender.body, Body::SevenBit);

        let sender =
            process_sender("MAIL FROM:<user@domain.com> SIZE=2147483648 BODY=BINARYMIME X=1")
                .unwrap();
        assert_eq!(sender.size, None);
        assert_eq!(sender.body, Body::EightBitMime);

        let sender = process_sender("MAIL FROM:<user@domain.com> SIZE=2147483647").unwrap();
        assert_eq!(sender.size, Some(2_147_483_647));
    }

    #[test]
    fn sender_without_brackets() {
        let sender = process_sender("MAIL FROM:user@domain.com SIZE=10").unwrap();
        assert_eq!(sender.address(), "user@domain.com");
        assert_eq!(sender.size, Some(10));
    }

    #[test]
    fn invalid_senders() {
        assert_eq!(
            process_sender("MAIL FROM <user@domain.com>"),
            Err(AddressError::MissingSeparator)
        );
        assert_eq!(process_sender("MAIL FROM:<>"), Err(AddressError::Empty));
        assert_eq!(
            process_sender("MAIL FROM:<userdomain.com>"),
            Err(AddressError::MissingAtSign)
        );
        assert!(process_sender("MAIL FROM:<us..er@domain.com>").is_err());
        assert!(process_sender("MAIL FROM:<user@-domain.com>").is_err());
        assert!(process_sender("MAIL FROM:<user@domain..com>").is_err());
    }

    #[test]
    fn recipients() {
        assert_eq!(
            process_recipient("RCPT TO:<c@d.com>"),
            Ok(Mailbox {
                local: "c".to_string(),
                domain: "d.com".to_string()
            })
        );
        assert!(process_recipient("RCPT TO: <first.last+tag@[192.0.2.1]>").is_ok());
        assert!(process_recipient("RCPT TO:<postmaster@[IPv6:2001:db8::1]>").is_ok());
        assert!(process_recipient("RCPT TO:<postmaster@[300.1.1.1]>").is_err());
        assert!(process_recipient("RCPT TO:").is_err());
    }

    #[test]
    fn usernames() {
        assert!(validate_username("john"));
        assert!(validate_username("john.doe-smith_2"));
        assert!(!validate_username("john..doe"));
        assert!(!validate_username("john._doe"));
        assert!(!validate_username(".john"));
        assert!(!validate_username("john-"));
        assert!(!validate_username(""));
        assert!(!validate_username("jöhn"));
    }

    #[test]
    fn domains() {
        assert!(validate_domain("example.com").is_ok());
        assert!(validate_domain("localhost").is_ok());
        assert!(validate_domain("[127.0.0.1]").is_ok());
        assert!(validate_domain("example_com").is_err());
        assert!(validate_domain("[127.0.0.1").is_err());
        assert!(validate_domain("").is_err());
    }
}
