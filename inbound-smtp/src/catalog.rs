//! Reply text for every status the engine sends.
//!
//! Handlers never format reply lines themselves; they pick a [`Status`] (and
//! optionally a detail string) and the catalog renders the wire line, without
//! the trailing CRLF.

use inbound_common::status::Status;

use crate::config::Identity;

/// Details longer than this many characters are cut short.
const MAX_DETAIL: usize = 100;

#[derive(Clone, Debug)]
pub struct Catalog {
    domain: String,
    vendor: String,
}

impl Catalog {
    #[must_use]
    pub fn new(identity: &Identity) -> Self {
        Self {
            domain: identity.domain.clone(),
            vendor: identity.vendor.clone(),
        }
    }

    /// Render `status` as a single reply line.
    #[must_use]
    pub fn render(&self, status: Status, detail: Option<&str>) -> String {
        let domain = &self.domain;
        let vendor = &self.vendor;
        let detail = truncate(detail.unwrap_or("None"));

        match status {
            Status::HelpHeader => {
                format!("213-{domain} The following commands are recognized by {vendor}")
            }
            Status::ServiceReady => format!("220 {domain} ESMTP {vendor} Ready"),
            Status::GoAhead => "220 Go ahead".to_string(),
            Status::GoodBye => format!("221 {domain} running {vendor} closing connection"),
            Status::Ok => "250 OK".to_string(),
            Status::GreetingContinued => format!("250-{domain} is my domain name."),
            Status::Greeting => format!("250 {domain} is my domain name."),
            Status::ListItem => format!("250-{detail}"),
            Status::ListEnd => format!("250 {detail}"),
            Status::CannotVerify => format!(
                "252 {domain} Cannot VRFY user, but will accept message and attempt delivery"
            ),
            Status::StartMailInput => "354 Start mail input; end with <CR><LF>.<CR><LF>".to_string(),
            Status::Unavailable => {
                format!("421 {domain} Service not available, closing transmission channel")
            }
            Status::MailboxBusy => format!(
                "450 {domain} Mailbox unavailable (busy or temporarily blocked). Requested action aborted"
            ),
            Status::ActionUnavailable => {
                format!("451 {domain} Requested action aborted: local error in processing")
            }
            Status::InsufficientStorage => {
                format!("452 {domain} Requested action not taken: insufficient system storage")
            }
            Status::TlsUnavailable => {
                format!("454 {domain} TLS not available due to temporary reason")
            }
            Status::PolicyDeferred => {
                format!("454 {domain} Requested action not taken: temporarily refused by policy")
            }
            Status::Unrecognised => {
                format!("500 {domain} Syntax error, command unrecognized | [Details] {detail}")
            }
            Status::InvalidParameters => format!(
                "501 {domain} Syntax error in parameters or arguments | [Details] {detail}"
            ),
            Status::NotImplemented => {
                format!("502 {domain} Command not implemented | [Details] {detail}")
            }
            Status::InvalidCommandSequence => format!("503 {domain} Bad sequence of commands"),
            Status::ParameterNotImplemented => {
                format!("504 {domain} Command parameter not implemented | [Details] {detail}")
            }
            Status::BadAddress => format!("510 {domain} Bad email address | [Details] {detail}"),
            Status::HostNotFound => format!(
                "512 {domain} Host server for the recipient's domain name cannot be found | [Details] {detail}"
            ),
            Status::SizeExceeded => format!("523 {domain} Total size exceeds maximum size"),
            Status::PolicyRejected => format!("541 {domain} Rejected for policy reasons"),
            Status::MailboxUnavailable => {
                format!("550 {domain} Requested action not taken: mailbox unavailable")
            }
            Status::ExceededStorage => format!(
                "552 {domain} Requested mail action aborted: exceeded storage allocation"
            ),
            Status::MailboxNameNotAllowed => {
                format!("553 {domain} Requested action not taken: mailbox name not allowed")
            }
            Status::TransactionFailed => format!("554 {domain} Transaction failed"),
            Status::Unknown(code) => format!("{code} No reason given"),
        }
    }

    /// Render a multi-line reply: a `head` line, one continuation line per
    /// entry in `items`, and a final ` `-separated line carrying `last`.
    ///
    /// `head` must be a continuation form (e.g. [`Status::GreetingContinued`]).
    #[must_use]
    pub fn render_list<I, S>(&self, head: Status, items: I, last: &str) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        std::iter::once(self.render(head, None))
            .chain(
                items
                    .into_iter()
                    .map(|item| self.render(Status::ListItem, Some(item.as_ref()))),
            )
            .chain(std::iter::once(self.render(Status::ListEnd, Some(last))))
            .collect()
    }
}

fn truncate(detail: &str) -> &str {
    detail
        .char_indices()
        .nth(MAX_DETAIL)
        .map_or(detail, |(idx, _)| &detail[..idx])
}

#[cfg(test)]
mod tests {
    use inbound_common::status::Status;
    use pretty_assertions::assert_eq;

    use super::Catalog;
    use crate::config::Identity;

    fn catalog() -> Catalog {
        Catalog::new(&Identity {
            host: "mx.test.com".to_string(),
            domain: "test.com".to_string(),
            vendor: "Vendor".to_string(),
        })
    }

    #[test]
    fn renders_identity() {
        let catalog = catalog();

        assert_eq!(
            catalog.render(Status::ServiceReady, None),
            "220 test.com ESMTP Vendor Ready"
        );
        assert_eq!(
            catalog.render(Status::GoodBye, None),
            "221 test.com running Vendor closing connection"
        );
        assert_eq!(catalog.render(Status::GoAhead, None), "220 Go ahead");
        assert_eq!(catalog.render(Status::Ok, Some("ignored")), "250 OK");
    }

    #[test]
    fn policy_deferral_is_not_a_tls_failure() {
        let catalog = catalog();

        assert_eq!(
            catalog.render(Status::PolicyDeferred, None),
            "454 test.com Requested action not taken: temporarily refused by policy"
        );
        assert_ne!(
            catalog.render(Status::PolicyDeferred, None),
            catalog.render(Status::TlsUnavailable, None)
        );
    }

    #[test]
    fn details() {
        let catalog = catalog();

        assert_eq!(
            catalog.render(Status::Unrecognised, Some("FOO")),
            "500 test.com Syntax error, command unrecognized | [Details] FOO"
        );
        assert_eq!(
            catalog.render(Status::InvalidParameters, None),
            "501 test.com Syntax error in parameters or arguments | [Details] None"
        );

        let long = "x".repeat(150);
        let rendered = catalog.render(Status::ListEnd, Some(&long));
        assert_eq!(rendered, format!("250 {}", "x".repeat(100)));
    }

    #[test]
    fn unknown_code() {
        assert_eq!(
            catalog().render(Status::from(299), None),
            "299 No reason given"
        );
    }

    #[test]
    fn list() {
        assert_eq!(
            catalog().render_list(Status::GreetingContinued, ["8BITMIME", "VRFY"], "HELP"),
            vec![
                "250-test.com is my domain name.",
                "250-8BITMIME",
                "250-VRFY",
                "250 HELP",
            ]
        );
    }
}
