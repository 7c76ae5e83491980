//! State-machine parser for address lists.
//!
//! Recognizes mailboxes (`local@domain` and `phrase <[route:]addr-spec>`),
//! groups (`phrase : mailbox-list ;`, no nesting), and bare words (qualified
//! with `@localhost`). Mailboxes are emitted through the accumulator in
//! input order the moment they complete; the phrase in front of an angle
//! address and any source route inside it are consumed but dropped.

use crate::envelope::Direction;

use super::{AddressError, Lexer, Token};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Expecting the start of a list entry.
    ListStart,
    /// One or more words seen; could still become a local part, a display
    /// phrase, or a group name.
    Phrase,
    /// A dot (or a route's colon) demands another word.
    ExpectWord,
    /// Word complete; only `@` or `.` may follow.
    WordDone,
    /// After `@` or a domain dot, expecting an atom or domain literal.
    ExpectDomain,
    /// A domain part is complete; separators or more dots may follow.
    DomainPart,
    /// Inside a group, between entries.
    GroupItem,
    /// Just consumed `<`.
    AngleOpen,
    /// Consuming an (ignored) source route after `<@`.
    RouteDomain,
}

/// Parse one address header value, emitting `(direction, mailbox)` for every
/// recognized address and returning how many were emitted.
///
/// # Errors
///
/// Any syntactic violation aborts the parse with an [`AddressError`]; no
/// partial results beyond the already-emitted mailboxes are produced.
pub fn parse<F>(
    lexer: &mut Lexer<'_>,
    direction: Direction,
    mut emit: F,
) -> Result<usize, AddressError>
where
    F: FnMut(Direction, Vec<u8>),
{
    let mut count = 0usize;
    let mut address: Vec<u8> = Vec::new();
    let mut in_group = false;
    let mut in_angle = false;
    let mut state = State::ListStart;

    let mut flush = |address: &mut Vec<u8>, count: &mut usize| {
        if !address.is_empty() {
            emit(direction, std::mem::take(address));
            *count += 1;
        }
    };

    loop {
        let token = lexer.next_token()?;
        state = match state {
            State::ListStart => match token {
                Token::Atom(text) | Token::QuotedString(text) => {
                    address.extend_from_slice(&text);
                    State::Phrase
                }
                Token::EndOfHeader => {
                    if in_group {
                        return Err(AddressError::UnexpectedEndOfHeader);
                    }
                    return Ok(count);
                }
                Token::Char(b',') => {
                    address.clear();
                    State::ListStart
                }
                Token::Char(c) => return Err(AddressError::UnexpectedChar(c as char)),
                Token::DomainLiteral(_) => return Err(AddressError::UnexpectedChar('[')),
            },

            State::Phrase => match token {
                Token::Char(b'.') => {
                    address.push(b'.');
                    State::ExpectWord
                }
                Token::Char(b'@') => {
                    address.push(b'@');
                    State::ExpectDomain
                }
                Token::Char(b'<') => State::AngleOpen,
                Token::Char(b':') => {
                    if in_group {
                        return Err(AddressError::NestedGroup);
                    }
                    address.clear();
                    in_group = true;
                    State::GroupItem
                }
                Token::Char(b',') => {
                    // Bare word: a list separator closes it as word@localhost.
                    address.extend_from_slice(b"@localhost");
                    flush(&mut address, &mut count);
                    if in_group {
                        State::GroupItem
                    } else {
                        State::ListStart
                    }
                }
                Token::Char(b';') => {
                    if !in_group {
                        return Err(AddressError::UnexpectedGroupEnd);
                    }
                    address.extend_from_slice(b"@localhost");
                    flush(&mut address, &mut count);
                    in_group = false;
                    State::ListStart
                }
                Token::Atom(text) | Token::QuotedString(text) => {
                    // Phrase words concatenate; the result is either a
                    // local part or discarded at `<`.
                    address.extend_from_slice(&text);
                    State::Phrase
                }
                Token::EndOfHeader => {
                    if in_group {
                        return Err(AddressError::UnexpectedEndOfHeader);
                    }
                    address.extend_from_slice(b"@localhost");
                    flush(&mut address, &mut count);
                    return Ok(count);
                }
                Token::Char(c) => return Err(AddressError::UnexpectedChar(c as char)),
                Token::DomainLiteral(_) => return Err(AddressError::UnexpectedChar('[')),
            },

            State::ExpectWord => match token {
                Token::Atom(text) | Token::QuotedString(text) => {
                    address.extend_from_slice(&text);
                    State::WordDone
                }
                Token::EndOfHeader => {
                    if in_group || in_angle {
                        return Err(AddressError::UnexpectedEndOfHeader);
                    }
                    return Ok(count);
                }
                _ => return Err(AddressError::ExpectedWordAfterDot),
            },

            State::WordDone => match token {
                Token::Char(b'.') => {
                    address.push(b'.');
                    State::ExpectWord
                }
                Token::Char(b'@') => {
                    address.push(b'@');
                    State::ExpectDomain
                }
                _ => return Err(AddressError::ExpectedAtOrDot),
            },

            State::ExpectDomain => match token {
                Token::Atom(text) | Token::DomainLiteral(text) => {
                    address.extend_from_slice(&text);
                    State::DomainPart
                }
                Token::Char(b',') => {
                    flush(&mut address, &mut count);
                    State::ListStart
                }
                _ => return Err(AddressError::ExpectedDomain),
            },

            State::DomainPart => match token {
                Token::Char(b'.') => {
                    address.push(b'.');
                    State::ExpectDomain
                }
                Token::Char(b';') => {
                    if !in_group {
                        return Err(AddressError::UnexpectedGroupEnd);
                    }
                    flush(&mut address, &mut count);
                    in_group = false;
                    State::ListStart
                }
                Token::Char(b'>') => {
                    flush(&mut address, &mut count);
                    if in_angle {
                        in_angle = false;
                        if in_group {
                            State::GroupItem
                        } else {
                            State::ListStart
                        }
                    } else {
                        State::DomainPart
                    }
                }
                Token::Char(b',') => {
                    flush(&mut address, &mut count);
                    if in_group {
                        State::GroupItem
                    } else {
                        State::ListStart
                    }
                }
                Token::EndOfHeader => {
                    if in_group || in_angle {
                        return Err(AddressError::UnexpectedEndOfHeader);
                    }
                    flush(&mut address, &mut count);
                    return Ok(count);
                }
                _ => return Err(AddressError::ExpectedDotAfterDomain),
            },

            State::GroupItem => match token {
                Token::Atom(text) | Token::QuotedString(text) => {
                    address.extend_from_slice(&text);
                    State::Phrase
                }
                Token::Char(b'<') => {
                    address.clear();
                    State::AngleOpen
                }
                Token::Char(b':') => {
                    if in_group {
                        return Err(AddressError::NestedGroup);
                    }
                    address.clear();
                    in_group = true;
                    State::GroupItem
                }
                Token::Char(b';') => {
                    if !in_group {
                        return Err(AddressError::UnexpectedGroupEnd);
                    }
                    in_group = false;
                    State::ListStart
                }
                Token::Char(b',') => {
                    if !in_group {
                        return Err(AddressError::UnexpectedChar(','));
                    }
                    State::ListStart
                }
                Token::EndOfHeader => {
                    if in_group {
                        return Err(AddressError::UnexpectedEndOfHeader);
                    }
                    return Ok(count);
                }
                Token::Char(c) => return Err(AddressError::UnexpectedChar(c as char)),
                Token::DomainLiteral(_) => return Err(AddressError::UnexpectedChar('[')),
            },

            State::AngleOpen => match token {
                Token::Char(b'@') => State::RouteDomain,
                Token::Atom(text) | Token::QuotedString(text) => {
                    in_angle = true;
                    address = text;
                    State::WordDone
                }
                _ => return Err(AddressError::MalformedAngleAddress),
            },

            State::RouteDomain => match token {
                Token::Char(b':') => {
                    address.clear();
                    in_angle = true;
                    State::ExpectWord
                }
                Token::EndOfHeader => return Err(AddressError::UnexpectedEndOfHeader),
                // Route domains, dots, and commas are consumed and dropped.
                _ => State::RouteDomain,
            },
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addresses(input: &[u8]) -> Vec<String> {
        try_addresses(input).unwrap()
    }

    fn try_addresses(input: &[u8]) -> Result<Vec<String>, AddressError> {
        let mut lexer = Lexer::new(input);
        let mut out = Vec::new();
        let count = parse(&mut lexer, Direction::To, |_, address| {
            out.push(String::from_utf8(address).unwrap());
        })?;
        assert_eq!(count, out.len());
        Ok(out)
    }

    #[test]
    fn bare_word_gets_localhost() {
        assert_eq!(addresses(b"root\r\n"), ["root@localhost"]);
    }

    #[test]
    fn plain_addr_spec() {
        assert_eq!(addresses(b"a@d\r\n"), ["a@d"]);
    }

    #[test]
    fn folded_domain() {
        assert_eq!(addresses(b"a@\r\n d\r\n"), ["a@d"]);
        assert_eq!(addresses(b"a.x@\r\n d\r\n"), ["a.x@d"]);
        assert_eq!(addresses(b"a@\r\n d . x\r\n"), ["a@d.x"]);
    }

    #[test]
    fn phrase_before_angle_address_is_dropped() {
        assert_eq!(addresses(b"walter <a@\r\n d . x>\r\n"), ["a@d.x"]);
        assert_eq!(addresses(b"walter ppk <a@\r\n d . x>\r\n"), ["a@d.x"]);
        assert_eq!(addresses(b"\"walter ppk\" <a@\r\n d . x>\r\n"), ["a@d.x"]);
        assert_eq!(addresses(b"George Jones<Group@Host>\r\n"), ["Group@Host"]);
        assert_eq!(addresses(b"George Jones <Group@Host>\r\n"), ["Group@Host"]);
    }

    #[test]
    fn rfc822_group_example() {
        assert_eq!(
            addresses(
                b"Important folk:\r\n\
                  \x20    Tom Softwood <Balsa@Tree.Root>,\r\n\
                  \x20     \"Sam Irving\"@Other-Host;,\r\n\
                  \tStandard Distribution:\r\n\
                  \x20    /main/davis/people/standard@Other-Host,\r\n\
                  \x20    \"<Jones>standard.dist.3\"@Tops-20-Host>;\r\n"
            ),
            [
                "Balsa@Tree.Root",
                "\"Sam Irving\"@Other-Host",
                "/main/davis/people/standard@Other-Host",
                "\"<Jones>standard.dist.3\"@Tops-20-Host",
            ]
        );
    }

    #[test]
    fn quoted_local_parts() {
        assert_eq!(
            addresses(b"\"Al Neuman\"@Mad-Host,\r\n  Sam.Irving@Other-Host\r\n"),
            ["\"Al Neuman\"@Mad-Host", "Sam.Irving@Other-Host"]
        );
    }

    #[test]
    fn empty_headers_yield_nothing() {
        assert_eq!(addresses(b"\r\n"), Vec::<String>::new());
        assert_eq!(addresses(b"   \r\n"), Vec::<String>::new());
    }

    #[test]
    fn comma_separated_list_keeps_input_order() {
        assert_eq!(
            addresses(b"Jones@Host, Smith@Other-Host, Doe@Somewhere-Else\r\n"),
            ["Jones@Host", "Smith@Other-Host", "Doe@Somewhere-Else"]
        );
    }

    #[test]
    fn group_with_folded_members() {
        assert_eq!(
            addresses(
                b"The Committee: Jones@Host.Net,\r\n\
                  \x20Smith@Other.Org,\r\n\
                  \x20Doe@Somewhere-Else;\r\n"
            ),
            ["Jones@Host.Net", "Smith@Other.Org", "Doe@Somewhere-Else"]
        );
    }

    #[test]
    fn multiple_groups_and_a_trailing_mailbox() {
        assert_eq!(
            addresses(
                b" Gourmets: Pompous Person <WhoZiWhatZit@Cordon-Bleu>,\r\n\
                  \x20         Childs@WGBH.Boston, Galloping Gourmet@\r\n\
                  \x20         ANT.Down-Under (Australian National Television),\r\n\
                  \x20         Cheapie@Discount-Liquors;,\r\n\
                  \x20Cruisers:  Port@Portugal, Jones@SEA;,\r\n\
                  \x20Another@Somewhere.SomeOrg\r\n"
            ),
            [
                "WhoZiWhatZit@Cordon-Bleu",
                "Childs@WGBH.Boston",
                "GallopingGourmet@ANT.Down-Under",
                "Cheapie@Discount-Liquors",
                "Port@Portugal",
                "Jones@SEA",
                "Another@Somewhere.SomeOrg",
            ]
        );
    }

    #[test]
    fn comments_fold_out_of_dotted_words() {
        assert_eq!(
            addresses(b" Wilt . (the  Stilt) Chamberlain@NBA.US\r\n"),
            ["Wilt.Chamberlain@NBA.US"]
        );
        assert_eq!(
            addresses(b" Wilt . (the(da)  Stilt) Chamberlain@NBA.US\r\n"),
            ["Wilt.Chamberlain@NBA.US"]
        );
    }

    #[test]
    fn non_ascii_phrase_bytes_survive_quoting() {
        assert_eq!(
            addresses(b"getrud@arschkrampen.de, \"g\xc3\xbcrgen\" <oliver@kalkofe.de>\r\n"),
            ["getrud@arschkrampen.de", "oliver@kalkofe.de"]
        );
    }

    #[test]
    fn nested_group_is_fatal() {
        assert_eq!(
            try_addresses(b"Outer: Inner: a@b;;\r\n"),
            Err(AddressError::NestedGroup)
        );
    }

    #[test]
    fn unterminated_group_is_fatal() {
        assert_eq!(
            try_addresses(b"The Committee: Jones@Host.Net,\r\n"),
            Err(AddressError::UnexpectedEndOfHeader)
        );
    }

    #[test]
    fn route_is_consumed_but_ignored() {
        assert_eq!(
            addresses(b"someone <@relay1,@relay2:user@example.org>\r\n"),
            ["user@example.org"]
        );
    }

    #[test]
    fn garbage_is_rejected() {
        assert_eq!(
            try_addresses(b"a@@\r\n"),
            Err(AddressError::ExpectedDomain)
        );
        assert_eq!(
            try_addresses(b"a@d e@f\r\n"),
            Err(AddressError::ExpectedDotAfterDomain)
        );
    }
}
