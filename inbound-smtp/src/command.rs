use core::fmt::{self, Display, Formatter};

/// The builtin SMTP verbs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Verb {
    Helo,
    Ehlo,
    MailFrom,
    RcptTo,
    Data,
    Rset,
    Noop,
    Quit,
    Vrfy,
    Help,
    StartTls,
}

impl Verb {
    /// Every builtin verb, in the order they are listed by `HELP`.
    pub const ALL: [Self; 11] = [
        Self::Helo,
        Self::Ehlo,
        Self::MailFrom,
        Self::RcptTo,
        Self::Data,
        Self::Help,
        Self::Rset,
        Self::Noop,
        Self::Quit,
        Self::Vrfy,
        Self::StartTls,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Helo => "HELO",
            Self::Ehlo => "EHLO",
            Self::MailFrom => "MAIL FROM",
            Self::RcptTo => "RCPT TO",
            Self::Data => "DATA",
            Self::Rset => "RSET",
            Self::Noop => "NOOP",
            Self::Quit => "QUIT",
            Self::Vrfy => "VRFY",
            Self::Help => "HELP",
            Self::StartTls => "STARTTLS",
        }
    }

    /// Look up a builtin verb from an already uppercased command name.
    #[must_use]
    pub fn lookup(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|verb| verb.as_str() == name)
    }

    /// Number of words the verb itself occupies.
    const fn width(self) -> usize {
        match self {
            Self::MailFrom | Self::RcptTo => 2,
            _ => 1,
        }
    }
}

impl Display for Verb {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        fmt.write_str(self.as_str())
    }
}

/// A tokenized command line.
///
/// Words are split on spaces and colons with empty words discarded, so
/// `MAIL FROM: <a@b.com> SIZE=10` becomes
/// `["MAIL", "FROM", "<a@b.com>", "SIZE=10"]` with the name `MAIL FROM`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    name: String,
    verb: Option<Verb>,
    words: Vec<String>,
    raw: String,
}

impl Command {
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let words = raw
            .split(' ')
            .flat_map(|word| word.trim().split(':'))
            .filter(|word| !word.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>();

        let first = words.first().map(|w| w.to_ascii_uppercase()).unwrap_or_default();
        let second = words.get(1).map(|w| w.to_ascii_uppercase());

        let name = match (first.as_str(), second.as_deref()) {
            ("MAIL", Some("FROM")) => "MAIL FROM".to_string(),
            ("RCPT", Some("TO")) => "RCPT TO".to_string(),
            _ => first,
        };

        Self {
            verb: Verb::lookup(&name),
            name,
            words,
            raw: raw.to_string(),
        }
    }

    /// The uppercased logical command name, e.g. `MAIL FROM` or `EHLO`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn verb(&self) -> Option<Verb> {
        self.verb
    }

    /// All words, including the command name itself.
    #[must_use]
    pub fn words(&self) -> &[String] {
        &self.words
    }

    /// The words following the command name.
    #[must_use]
    pub fn arguments(&self) -> &[String] {
        let width = self.verb.map_or(1, Verb::width);
        self.words.get(width..).unwrap_or_default()
    }

    /// The line as received, without its terminator.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

impl Display for Command {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        fmt.write_str(&self.raw)
    }
}

#[cfg(test)]
mod test {
    use super::{Command, Verb};

    // Idea copied from https://gitlab.com/erichdongubler-experiments/rust_case_permutations/blob/master/src/lib.rs#L97
    fn string_casing(string: &str) -> impl Iterator<Item = String> {
        let len = string.len();
        let num_cases = usize::pow(2, u32::try_from(len).unwrap_or(0));

        let (upper, lower) = string.chars().fold(
            (Vec::with_capacity(len), Vec::with_capacity(len)),
            |(mut upper, mut lower), c| {
                upper.push(c.to_ascii_uppercase());
                lower.push(c.to_ascii_lowercase());
                (upper, lower)
            },
        );

        (0..num_cases).map(move |i| {
            (0..len).fold(String::with_capacity(len), |mut s, idx| {
                if (i & (1 << idx)) == 0 {
                    s.push(lower[idx]);
                } else {
                    s.push(upper[idx]);
                }
                s
            })
        })
    }

    #[test]
    fn mail_from_command() {
        for comm in string_casing("mail from") {
            let command = Command::parse(&format!("{comm}:<test@gmail.com> SIZE=100"));
            assert_eq!(command.name(), "MAIL FROM");
            assert_eq!(command.verb(), Some(Verb::MailFrom));
            assert_eq!(command.arguments(), ["<test@gmail.com>", "SIZE=100"]);
        }

        let command = Command::parse("MAIL FROM: <test@gmail.com>");
        assert_eq!(command.words(), ["MAIL", "FROM", "<test@gmail.com>"]);
    }

    #[test]
    fn rcpt_to_command() {
        for comm in string_casing("rcpt to") {
            let command = Command::parse(&format!("{comm}:<test@gmail.com>"));
            assert_eq!(command.verb(), Some(Verb::RcptTo));
            assert_eq!(command.arguments(), ["<test@gmail.com>"]);
        }
    }

    #[test]
    fn helo_ehlo_command() {
        for comm in string_casing("ehlo") {
            let command = Command::parse(&format!("{comm} example.com"));
            assert_eq!(command.verb(), Some(Verb::Ehlo));
            assert_eq!(command.arguments(), ["example.com"]);
        }

        for comm in string_casing("helo") {
            assert_eq!(Command::parse(&comm).verb(), Some(Verb::Helo));
        }
    }

    #[test]
    fn other_commands() {
        for (text, verb) in [
            ("data", Verb::Data),
            ("quit", Verb::Quit),
            ("starttls", Verb::StartTls),
            ("rset", Verb::Rset),
            ("noop", Verb::Noop),
            ("help", Verb::Help),
            ("vrfy", Verb::Vrfy),
        ] {
            for comm in string_casing(text) {
                assert_eq!(Command::parse(&comm).verb(), Some(verb));
            }
        }
    }

    #[test]
    fn unknown_and_custom_commands() {
        let command = Command::parse("CUSTOM: SERVER_NAME=\"Test Server\" NEW");
        assert_eq!(command.name(), "CUSTOM");
        assert_eq!(command.verb(), None);
        assert_eq!(command.arguments(), ["SERVER_NAME=\"Test", "Server\"", "NEW"]);

        // A lone MAIL is not MAIL FROM
        let command = Command::parse("MAIL <a@b.com>");
        assert_eq!(command.name(), "MAIL");
        assert_eq!(command.verb(), None);

        let command = Command::parse("   ");
        assert_eq!(command.name(), "");
        assert!(command.words().is_empty());
    }
}
