//-
// Copyright (c) 2026, The igrab developers
//
// This file is part of igrab.
//
// igrab is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// igrab is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// igrab. If not, see <http://www.gnu.org/licenses/>.

//! Parsing of the IMAP commands the read-only server understands.
//!
//! Only the subset of RFC 3501 needed to browse a backup is recognised in
//! full. Commands which would modify anything are recognised by name only,
//! with their arguments skipped, since they are refused anyway.
//!
//! Sequence sets are returned as raw strings; they can only be interpreted
//! once the size of the selected mailbox is known.
//!
//! Literals are expected to have been spliced into the command line in their
//! wire form, i.e. `{3}\r\nabc`.

use std::borrow::Cow;
use std::str;

use nom::{
    branch::alt,
    bytes::complete::{is_a, is_not, tag, tag_no_case, take, take_while1},
    character::complete::digit1,
    combinator::{all_consuming, map, map_opt, opt, rest, value},
    error::ErrorKind,
    multi::{fold_many0, separated_nonempty_list},
    sequence::{delimited, pair, preceded, separated_pair, terminated, tuple},
    IResult,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandLine {
    pub tag: String,
    pub cmd: Command,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Capability,
    Noop,
    Logout,
    Login {
        user: String,
        password: String,
    },
    List {
        reference: String,
        pattern: String,
    },
    Lsub {
        reference: String,
        pattern: String,
    },
    Status {
        mailbox: String,
        atts: Vec<StatusAtt>,
    },
    Select(String),
    Examine(String),
    Create(String),
    Subscribe(String),
    Unsubscribe(String),
    Close,
    Unselect,
    Check,
    Fetch {
        uid: bool,
        seqset: String,
        atts: Vec<FetchAtt>,
    },
    Search {
        uid: bool,
        keys: Vec<SearchKey>,
    },
    Append,
    Copy,
    Store,
    Expunge,
    Delete(String),
    Rename,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusAtt {
    Messages,
    Recent,
    UidNext,
    UidValidity,
    Unseen,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchAtt {
    Uid,
    Flags,
    InternalDate,
    Rfc822Size,
    Rfc822,
    Rfc822Header,
    Rfc822Text,
    Body {
        peek: bool,
        section: Section,
        /// `(offset, length)`
        partial: Option<(u32, u32)>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Section {
    Full,
    Header,
    Text,
    HeaderFields { not: bool, fields: Vec<String> },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SearchKey {
    All,
    SeqSet(String),
    Uid(String),
    Answered,
    Deleted,
    Draft,
    Flagged,
    Seen,
    Unanswered,
    Undeleted,
    Undraft,
    Unflagged,
    Unseen,
    New,
    Old,
    Recent,
    Keyword(String),
    Unkeyword(String),
    Larger(u32),
    Smaller(u32),
    Header(String, String),
    Body(String),
    Text(String),
    Not(Box<SearchKey>),
    Or(Box<SearchKey>, Box<SearchKey>),
    And(Vec<SearchKey>),
}

/// Why a command line could not be parsed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseFailure {
    /// The tag was readable, so the failure can be reported against it.
    Tagged(String),
    Untagged,
}

/// Parse a complete command line, without its final CRLF.
pub fn parse_command_line(line: &[u8]) -> Result<CommandLine, ParseFailure> {
    let (i, tag) = match terminated(tag_atom, tag(" "))(line) {
        Ok(r) => r,
        Err(_) => return Err(ParseFailure::Untagged),
    };
    let tag = tag.into_owned();

    match all_consuming(command)(i) {
        Ok((_, cmd)) => Ok(CommandLine { tag, cmd }),
        Err(_) => Err(ParseFailure::Tagged(tag)),
    }
}

fn fail<T>(i: &[u8]) -> IResult<&[u8], T> {
    Err(nom::Err::Error((i, ErrorKind::Tag)))
}

fn sp(i: &[u8]) -> IResult<&[u8], &[u8]> {
    tag(" ")(i)
}

fn command(i: &[u8]) -> IResult<&[u8], Command> {
    let (i, word) = normal_atom(i)?;
    match &word.to_ascii_uppercase()[..] {
        "CAPABILITY" => Ok((i, Command::Capability)),
        "NOOP" => Ok((i, Command::Noop)),
        "LOGOUT" => Ok((i, Command::Logout)),
        "CLOSE" => Ok((i, Command::Close)),
        "UNSELECT" => Ok((i, Command::Unselect)),
        "CHECK" => Ok((i, Command::Check)),
        "EXPUNGE" => Ok((i, Command::Expunge)),
        "LOGIN" => map(
            tuple((sp, astring, sp, astring)),
            |(_, user, _, password)| Command::Login {
                user: user.into_owned(),
                password: password.into_owned(),
            },
        )(i),
        "LIST" => map(list_args, |(reference, pattern)| Command::List {
            reference,
            pattern,
        })(i),
        "LSUB" => map(list_args, |(reference, pattern)| Command::Lsub {
            reference,
            pattern,
        })(i),
        "STATUS" => map(
            tuple((
                sp,
                mailbox,
                sp,
                delimited(
                    tag("("),
                    separated_nonempty_list(sp, status_att),
                    tag(")"),
                ),
            )),
            |(_, mailbox, _, atts)| Command::Status { mailbox, atts },
        )(i),
        "SELECT" => map(preceded(sp, mailbox), Command::Select)(i),
        "EXAMINE" => map(preceded(sp, mailbox), Command::Examine)(i),
        "CREATE" => map(preceded(sp, mailbox), Command::Create)(i),
        "DELETE" => map(preceded(sp, mailbox), Command::Delete)(i),
        "SUBSCRIBE" => map(preceded(sp, mailbox), Command::Subscribe)(i),
        "UNSUBSCRIBE" => map(preceded(sp, mailbox), Command::Unsubscribe)(i),
        "FETCH" => fetch_args(false, i),
        "SEARCH" => search_args(false, i),
        "APPEND" => value(Command::Append, rest)(i),
        "COPY" | "MOVE" => value(Command::Copy, rest)(i),
        "STORE" => value(Command::Store, rest)(i),
        "RENAME" => value(Command::Rename, rest)(i),
        "UID" => uid_command(i),
        _ => fail(i),
    }
}

fn uid_command(i: &[u8]) -> IResult<&[u8], Command> {
    let (i, word) = preceded(sp, normal_atom)(i)?;
    match &word.to_ascii_uppercase()[..] {
        "FETCH" => fetch_args(true, i),
        "SEARCH" => search_args(true, i),
        "COPY" | "MOVE" => value(Command::Copy, rest)(i),
        "STORE" => value(Command::Store, rest)(i),
        "EXPUNGE" => value(Command::Expunge, rest)(i),
        _ => fail(i),
    }
}

fn list_args(i: &[u8]) -> IResult<&[u8], (String, String)> {
    map(
        tuple((sp, mailbox, sp, list_mailbox)),
        |(_, reference, _, pattern)| (reference, pattern.into_owned()),
    )(i)
}

fn status_att(i: &[u8]) -> IResult<&[u8], StatusAtt> {
    map_opt(normal_atom, |a| match &a.to_ascii_uppercase()[..] {
        "MESSAGES" => Some(StatusAtt::Messages),
        "RECENT" => Some(StatusAtt::Recent),
        "UIDNEXT" => Some(StatusAtt::UidNext),
        "UIDVALIDITY" => Some(StatusAtt::UidValidity),
        "UNSEEN" => Some(StatusAtt::Unseen),
        _ => None,
    })(i)
}

fn fetch_args(uid: bool, i: &[u8]) -> IResult<&[u8], Command> {
    map(
        tuple((sp, sequence_set, sp, fetch_atts)),
        move |(_, seqset, _, atts)| Command::Fetch {
            uid,
            seqset: seqset.into_owned(),
            atts,
        },
    )(i)
}

fn fetch_atts(i: &[u8]) -> IResult<&[u8], Vec<FetchAtt>> {
    alt((
        delimited(tag("("), separated_nonempty_list(sp, fetch_att), tag(")")),
        fetch_macro,
        map(fetch_att, |att| vec![att]),
    ))(i)
}

// ENVELOPE and BODY are not offered, so the macros shrink accordingly.
fn fetch_macro(i: &[u8]) -> IResult<&[u8], Vec<FetchAtt>> {
    value(
        vec![FetchAtt::Flags, FetchAtt::InternalDate, FetchAtt::Rfc822Size],
        alt((tag_no_case("ALL"), tag_no_case("FAST"), tag_no_case("FULL"))),
    )(i)
}

fn fetch_att(i: &[u8]) -> IResult<&[u8], FetchAtt> {
    alt((
        body_section_att,
        map_opt(normal_atom, |a| match &a.to_ascii_uppercase()[..] {
            "UID" => Some(FetchAtt::Uid),
            "FLAGS" => Some(FetchAtt::Flags),
            "INTERNALDATE" => Some(FetchAtt::InternalDate),
            "RFC822.SIZE" => Some(FetchAtt::Rfc822Size),
            "RFC822" => Some(FetchAtt::Rfc822),
            "RFC822.HEADER" => Some(FetchAtt::Rfc822Header),
            "RFC822.TEXT" => Some(FetchAtt::Rfc822Text),
            _ => None,
        }),
    ))(i)
}

fn body_section_att(i: &[u8]) -> IResult<&[u8], FetchAtt> {
    map(
        tuple((
            alt((
                value(true, tag_no_case("BODY.PEEK[")),
                value(false, tag_no_case("BODY[")),
            )),
            section_spec,
            tag("]"),
            opt(delimited(
                tag("<"),
                separated_pair(number, tag("."), number),
                tag(">"),
            )),
        )),
        |(peek, section, _, partial)| FetchAtt::Body {
            peek,
            section,
            partial,
        },
    )(i)
}

fn section_spec(i: &[u8]) -> IResult<&[u8], Section> {
    alt((
        map(
            preceded(tag_no_case("HEADER.FIELDS.NOT "), header_list),
            |fields| Section::HeaderFields { not: true, fields },
        ),
        map(preceded(tag_no_case("HEADER.FIELDS "), header_list), |fields| {
            Section::HeaderFields { not: false, fields }
        }),
        value(Section::Header, tag_no_case("HEADER")),
        value(Section::Text, tag_no_case("TEXT")),
        value(Section::Full, tag("")),
    ))(i)
}

fn header_list(i: &[u8]) -> IResult<&[u8], Vec<String>> {
    delimited(
        tag("("),
        separated_nonempty_list(sp, map(astring, Cow::into_owned)),
        tag(")"),
    )(i)
}

fn search_args(uid: bool, i: &[u8]) -> IResult<&[u8], Command> {
    map(
        preceded(
            pair(sp, opt(tuple((tag_no_case("CHARSET"), sp, astring, sp)))),
            separated_nonempty_list(sp, search_key),
        ),
        move |keys| Command::Search { uid, keys },
    )(i)
}

fn search_key(i: &[u8]) -> IResult<&[u8], SearchKey> {
    alt((
        map(
            delimited(
                tag("("),
                separated_nonempty_list(sp, search_key),
                tag(")"),
            ),
            SearchKey::And,
        ),
        map(sequence_set, |s| SearchKey::SeqSet(s.into_owned())),
        search_key_word,
    ))(i)
}

fn search_key_word(i: &[u8]) -> IResult<&[u8], SearchKey> {
    fn string_arg(i: &[u8]) -> IResult<&[u8], String> {
        map(preceded(sp, astring), Cow::into_owned)(i)
    }

    let (i, word) = normal_atom(i)?;
    let word = word.to_ascii_uppercase();
    let header = |name: &'static str| {
        move |i| {
            map(string_arg, |v| SearchKey::Header(name.to_owned(), v))(i)
        }
    };

    match &word[..] {
        "ALL" => Ok((i, SearchKey::All)),
        "ANSWERED" => Ok((i, SearchKey::Answered)),
        "DELETED" => Ok((i, SearchKey::Deleted)),
        "DRAFT" => Ok((i, SearchKey::Draft)),
        "FLAGGED" => Ok((i, SearchKey::Flagged)),
        "SEEN" => Ok((i, SearchKey::Seen)),
        "UNANSWERED" => Ok((i, SearchKey::Unanswered)),
        "UNDELETED" => Ok((i, SearchKey::Undeleted)),
        "UNDRAFT" => Ok((i, SearchKey::Undraft)),
        "UNFLAGGED" => Ok((i, SearchKey::Unflagged)),
        "UNSEEN" => Ok((i, SearchKey::Unseen)),
        "NEW" => Ok((i, SearchKey::New)),
        "OLD" => Ok((i, SearchKey::Old)),
        "RECENT" => Ok((i, SearchKey::Recent)),
        "UID" => map(preceded(sp, sequence_set), |s| {
            SearchKey::Uid(s.into_owned())
        })(i),
        "KEYWORD" => map(preceded(sp, normal_atom), |k| {
            SearchKey::Keyword(k.into_owned())
        })(i),
        "UNKEYWORD" => map(preceded(sp, normal_atom), |k| {
            SearchKey::Unkeyword(k.into_owned())
        })(i),
        "LARGER" => map(preceded(sp, number), SearchKey::Larger)(i),
        "SMALLER" => map(preceded(sp, number), SearchKey::Smaller)(i),
        "HEADER" => map(pair(string_arg, string_arg), |(name, v)| {
            SearchKey::Header(name, v)
        })(i),
        "SUBJECT" => header("Subject")(i),
        "FROM" => header("From")(i),
        "TO" => header("To")(i),
        "CC" => header("Cc")(i),
        "BCC" => header("Bcc")(i),
        "BODY" => map(string_arg, SearchKey::Body)(i),
        "TEXT" => map(string_arg, SearchKey::Text)(i),
        "NOT" => map(preceded(sp, search_key), |k| {
            SearchKey::Not(Box::new(k))
        })(i),
        "OR" => map(
            tuple((sp, search_key, sp, search_key)),
            |(_, a, _, b)| SearchKey::Or(Box::new(a), Box::new(b)),
        )(i),
        _ => fail(i),
    }
}

// ==================== PRIMITIVE PARSERS ====================

fn normal_atom(i: &[u8]) -> IResult<&[u8], Cow<str>> {
    map(
        take_while1(|b| match b {
            0..=b' ' => false,
            127..=255 => false,
            b'(' | b')' | b'{' | b'*' | b'%' | b'\\' | b'"' | b']' => false,
            _ => true,
        }),
        String::from_utf8_lossy,
    )(i)
}

fn astring_atom(i: &[u8]) -> IResult<&[u8], Cow<str>> {
    map(
        take_while1(|b| match b {
            0..=b' ' => false,
            127..=255 => false,
            b'(' | b')' | b'{' | b'*' | b'%' | b'\\' | b'"' => false,
            _ => true,
        }),
        String::from_utf8_lossy,
    )(i)
}

fn tag_atom(i: &[u8]) -> IResult<&[u8], Cow<str>> {
    map(
        take_while1(|b| match b {
            0..=b' ' => false,
            127..=255 => false,
            b'(' | b')' | b'{' | b'*' | b'%' | b'\\' | b'"' | b'+' => false,
            _ => true,
        }),
        String::from_utf8_lossy,
    )(i)
}

fn list_mailbox_atom(i: &[u8]) -> IResult<&[u8], Cow<str>> {
    map(
        take_while1(|b| match b {
            0..=b' ' => false,
            127..=255 => false,
            b'(' | b')' | b'{' | b'\\' | b'"' => false,
            _ => true,
        }),
        String::from_utf8_lossy,
    )(i)
}

fn number(i: &[u8]) -> IResult<&[u8], u32> {
    map_opt(digit1, |s| {
        str::from_utf8(s).ok().and_then(|s| s.parse::<u32>().ok())
    })(i)
}

fn literal(i: &[u8]) -> IResult<&[u8], &[u8]> {
    let (i, len) =
        delimited(tag("{"), number, alt((tag("+}\r\n"), tag("}\r\n"))))(i)?;
    take(len)(i)
}

fn quoted_char(i: &[u8]) -> IResult<&[u8], &[u8]> {
    preceded(tag("\\"), alt((tag("\\"), tag("\""))))(i)
}

fn quoted_string_content(i: &[u8]) -> IResult<&[u8], &[u8]> {
    alt((quoted_char, is_not("\r\n\"\\")))(i)
}

fn quoted(i: &[u8]) -> IResult<&[u8], Cow<str>> {
    delimited(
        tag("\""),
        fold_many0(
            map(quoted_string_content, String::from_utf8_lossy),
            Cow::Owned(String::new()),
            |mut accum: Cow<str>, piece| {
                if accum.is_empty() {
                    piece
                } else {
                    Cow::to_mut(&mut accum).push_str(&piece);
                    accum
                }
            },
        ),
        tag("\""),
    )(i)
}

fn string(i: &[u8]) -> IResult<&[u8], Cow<str>> {
    alt((quoted, map(literal, String::from_utf8_lossy)))(i)
}

fn astring(i: &[u8]) -> IResult<&[u8], Cow<str>> {
    alt((astring_atom, string))(i)
}

// Mailbox names are passed through in wire form. Folders are stored under
// the names the remote server used on the wire, so no decoding is needed
// to find them again.
fn mailbox(i: &[u8]) -> IResult<&[u8], String> {
    map(astring, Cow::into_owned)(i)
}

fn list_mailbox(i: &[u8]) -> IResult<&[u8], Cow<str>> {
    alt((list_mailbox_atom, string))(i)
}

fn sequence_set(i: &[u8]) -> IResult<&[u8], Cow<str>> {
    map(is_a("0123456789:*,"), String::from_utf8_lossy)(i)
}
