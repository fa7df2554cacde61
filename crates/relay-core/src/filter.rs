//! Packet filter predicate
//!
//! The digipeaters and the IGate ask a [`PacketFilter`] whether a packet may
//! travel from one channel to another. [`ExprFilter`] evaluates the usual
//! expression language:
//!
//! ```text
//! b/W1ABC*/K2XYZ-7 & ! t/m | ( d/WIDE1-1 & u/APRS )
//! ```
//!
//! | Spec | Matches |
//! |------|---------|
//! | `b/` | source address |
//! | `d/` | any repeater already used |
//! | `v/` | any repeater not yet used |
//! | `u/` | destination, except Mic-E |
//! | `t/` | data type letters `p o i m q c s t u h w n` |
//! | `0` `1` | constant reject / accept |
//!
//! Patterns are separated by the character following the type letter and
//! may end with a single `*` wildcard. Operators are `!`, `&`, `|` and
//! parentheses; a specification must be followed by a space or end of line.
//! An empty expression rejects everything.

use relay_packet::Packet;
use tracing::{debug, warn};

use crate::error::FilterError;

/// Channel number that stands for the APRS-IS side in filter calls
pub const IGATE_CHANNEL: usize = usize::MAX;

/// Decides whether a packet may pass between two channels
pub trait PacketFilter: Send + Sync {
    /// `true` to let the packet through
    fn allow(&self, from_chan: usize, to_chan: usize, expr: &str, packet: &Packet) -> bool;
}

/// Filter that lets everything through regardless of the expression
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl PacketFilter for AcceptAll {
    fn allow(&self, _from: usize, _to: usize, _expr: &str, _packet: &Packet) -> bool {
        true
    }
}

/// Expression language filter
#[derive(Debug, Clone, Copy, Default)]
pub struct ExprFilter;

impl ExprFilter {
    /// Evaluate `expr` against `packet`.
    ///
    /// Frames that are not APRS (connected mode) only accept the address
    /// based specifications.
    pub fn evaluate(expr: &str, packet: &Packet) -> Result<bool, FilterError> {
        let mut parser = Parser::new(expr, packet);
        if parser.token == Token::Eol {
            return Ok(false);
        }
        let result = parser.parse_or()?;
        match parser.token {
            Token::Eol => Ok(result),
            _ => Err(FilterError::ExpectedOperator(parser.token_text())),
        }
    }
}

impl PacketFilter for ExprFilter {
    fn allow(&self, from_chan: usize, to_chan: usize, expr: &str, packet: &Packet) -> bool {
        match Self::evaluate(expr, packet) {
            Ok(result) => {
                debug!(
                    "Packet filter {} from channel {} to {} returns {}",
                    expr,
                    chan_name(from_chan),
                    chan_name(to_chan),
                    result
                );
                result
            }
            Err(e) => {
                warn!("Packet filter \"{}\": {}", expr, e);
                false
            }
        }
    }
}

fn chan_name(chan: usize) -> String {
    if chan == IGATE_CHANNEL {
        "IGate".to_string()
    } else {
        chan.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    And,
    Or,
    Not,
    LParen,
    RParen,
    Spec(String),
    Eol,
}

struct Parser<'a> {
    chars: Vec<char>,
    pos: usize,
    token: Token,
    packet: &'a Packet,
}

impl<'a> Parser<'a> {
    fn new(expr: &str, packet: &'a Packet) -> Self {
        let chars = expr
            .chars()
            .map(|c| if c.is_control() { ' ' } else { c })
            .collect();
        let mut parser = Self {
            chars,
            pos: 0,
            token: Token::Eol,
            packet,
        };
        parser.next_token();
        parser
    }

    fn next_token(&mut self) {
        while self.chars.get(self.pos) == Some(&' ') {
            self.pos += 1;
        }
        let Some(&c) = self.chars.get(self.pos) else {
            self.token = Token::Eol;
            return;
        };
        self.pos += 1;
        self.token = match c {
            '&' => Token::And,
            '|' => Token::Or,
            '!' => Token::Not,
            '(' => Token::LParen,
            ')' => Token::RParen,
            _ => {
                let mut spec = String::from(c);
                while let Some(&c) = self.chars.get(self.pos) {
                    if c == ' ' {
                        break;
                    }
                    spec.push(c);
                    self.pos += 1;
                }
                Token::Spec(spec)
            }
        };
    }

    fn token_text(&self) -> String {
        match &self.token {
            Token::And => "&".into(),
            Token::Or => "|".into(),
            Token::Not => "!".into(),
            Token::LParen => "(".into(),
            Token::RParen => ")".into(),
            Token::Spec(s) => s.clone(),
            Token::Eol => "end-of-line".into(),
        }
    }

    fn parse_or(&mut self) -> Result<bool, FilterError> {
        let mut result = self.parse_and()?;
        while self.token == Token::Or {
            self.next_token();
            let rhs = self.parse_and()?;
            result |= rhs;
        }
        Ok(result)
    }

    fn parse_and(&mut self) -> Result<bool, FilterError> {
        let mut result = self.parse_primary()?;
        while self.token == Token::And {
            self.next_token();
            let rhs = self.parse_primary()?;
            result &= rhs;
        }
        Ok(result)
    }

    fn parse_primary(&mut self) -> Result<bool, FilterError> {
        match self.token.clone() {
            Token::LParen => {
                self.next_token();
                let result = self.parse_or()?;
                if self.token != Token::RParen {
                    return Err(FilterError::ExpectedCloseParen(self.token_text()));
                }
                self.next_token();
                Ok(result)
            }
            Token::Not => {
                self.next_token();
                Ok(!self.parse_primary()?)
            }
            Token::Spec(spec) => {
                let result = eval_spec(&spec, self.packet);
                self.next_token();
                result
            }
            _ => Err(FilterError::ExpectedOperand(self.token_text())),
        }
    }
}

fn eval_spec(spec: &str, packet: &Packet) -> Result<bool, FilterError> {
    let mut chars = spec.chars();
    let kind = chars.next().unwrap_or(' ');
    let has_sep = chars.next().is_some_and(|c| c.is_ascii_punctuation());

    if !packet.is_aprs() && !"01bdvu".contains(kind) {
        return Err(FilterError::NotAllowedForConnected(spec.to_string()));
    }

    match (kind, has_sep) {
        _ if spec == "0" => Ok(false),
        _ if spec == "1" => Ok(true),
        ('b', true) => match_patterns(spec, &packet.source().with_ssid()),
        ('d', true) => {
            for via in packet.repeaters().iter().filter(|a| a.is_heard()) {
                if match_patterns(spec, &via.with_ssid())? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        ('v', true) => {
            for via in packet.repeaters().iter().filter(|a| !a.is_heard()) {
                if match_patterns(spec, &via.with_ssid())? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        ('u', true) => match packet.dti() {
            Some(b'\'') | Some(b'`') => Ok(false),
            _ => match_patterns(spec, &packet.destination().with_ssid()),
        },
        ('t', true) => match_types(spec, packet),
        _ => Err(FilterError::UnknownType(kind)),
    }
}

/// Exact or trailing-wildcard match against any listed pattern
fn match_patterns(spec: &str, value: &str) -> Result<bool, FilterError> {
    let mut chars = spec.chars();
    chars.next();
    let Some(sep) = chars.next() else {
        return Ok(false);
    };
    for pattern in chars.as_str().split(sep) {
        match pattern.find('*') {
            Some(star) if star + 1 != pattern.len() => {
                return Err(FilterError::MisplacedWildcard(pattern.to_string()));
            }
            Some(star) => {
                if value.starts_with(&pattern[..star]) {
                    return Ok(true);
                }
            }
            None => {
                if pattern == value {
                    return Ok(true);
                }
            }
        }
    }
    Ok(false)
}

fn match_types(spec: &str, packet: &Packet) -> Result<bool, FilterError> {
    let class = classify(packet.info());
    for letter in spec.chars().skip(2) {
        let hit = match letter {
            'p' => class == Class::Position,
            'o' => class == Class::Object,
            'i' => class == Class::Item,
            'm' => class == Class::Message,
            'q' => class == Class::Query,
            'c' => class == Class::Capabilities,
            's' => class == Class::Status,
            't' => class == Class::Telemetry,
            'u' => class == Class::UserDefined,
            'h' => packet.is_third_party(),
            'w' => class == Class::Weather || has_weather_symbol(packet.info()),
            'n' => class == Class::Nws,
            other => return Err(FilterError::InvalidTypeLetter(other)),
        };
        if hit {
            return Ok(true);
        }
    }
    Ok(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    Position,
    Object,
    Item,
    Message,
    Query,
    Capabilities,
    Status,
    Telemetry,
    UserDefined,
    Weather,
    Nws,
    ThirdParty,
    Other,
}

/// Rough APRS packet type from the data type indicator
fn classify(info: &[u8]) -> Class {
    match info.first() {
        Some(b'$') if info.starts_with(b"$ULTW") => Class::Weather,
        Some(b'!' | b'=' | b'/' | b'@' | b'$' | b'\'' | b'`') => Class::Position,
        Some(b';') => Class::Object,
        Some(b')') => Class::Item,
        Some(b':') => classify_message(info),
        Some(b'?') => Class::Query,
        Some(b'<') => Class::Capabilities,
        Some(b'>') => Class::Status,
        Some(b'T') => Class::Telemetry,
        Some(b'{') => Class::UserDefined,
        Some(b'_' | b'#' | b'*') => Class::Weather,
        Some(b'}') => Class::ThirdParty,
        _ => Class::Other,
    }
}

/// Split `:ADDRESSEE:text` into telemetry metadata, NWS bulletins and the
/// rest
fn classify_message(info: &[u8]) -> Class {
    const TELEMETRY: [&[u8]; 4] = [b"PARM.", b"UNIT.", b"EQNS.", b"BITS."];
    const NWS: [&[u8]; 4] = [b"NWS", b"SKY", b"CWA", b"BOM"];

    if info.len() >= 16 && info[10] == b':' && TELEMETRY.contains(&&info[11..16]) {
        return Class::Telemetry;
    }
    if info.len() >= 4 && NWS.contains(&&info[1..4]) {
        return Class::Nws;
    }
    Class::Message
}

/// Position or object whose symbol code is `_`
fn has_weather_symbol(info: &[u8]) -> bool {
    let start = match info.first() {
        Some(b'!' | b'=') => 1,
        Some(b'/' | b'@') => 8,
        Some(b';') => 18,
        _ => return false,
    };
    let Some(first) = info.get(start) else {
        return false;
    };
    let offset = if first.is_ascii_digit() { 18 } else { 9 };
    info.get(start + offset) == Some(&b'_')
}
