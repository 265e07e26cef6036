use std::fmt;

use nom::bytes::complete::tag;
use nom::character::complete::u64 as dec_u64;
use nom::combinator::all_consuming;
use nom::error::{Error, ErrorKind};
use nom::IResult;

const PREFIX: &str = "I am ";
const INFIX: &str = ", please, accept our ping ";

/// The keepalive payload: `I am {name}, please, accept our ping {sequence}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ping<'a> {
    pub name: &'a str,
    pub sequence: u64,
}

impl<'a> Ping<'a> {
    pub fn new(name: &'a str, sequence: u64) -> Self {
        Ping { name, sequence }
    }

    /// Parse a ping payload.
    ///
    /// The name may itself contain the infix; the sequence follows the last one.
    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], Ping<'a>> {
        let (input, _) = tag(PREFIX)(input)?;

        let infix = INFIX.as_bytes();
        let Some(at) = input.windows(infix.len()).rposition(|w| w == infix) else {
            return Err(nom::Err::Error(Error::new(input, ErrorKind::TakeUntil)));
        };
        let (name, input) = input.split_at(at);
        let name = std::str::from_utf8(name)
            .map_err(|_| nom::Err::Error(Error::new(name, ErrorKind::MapRes)))?;

        let (input, _) = tag(INFIX)(input)?;
        let (input, sequence) = all_consuming(dec_u64)(input)?;

        Ok((input, Ping { name, sequence }))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(self.to_string().as_bytes());
    }
}

impl fmt::Display for Ping<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}{}", PREFIX, self.name, INFIX, self.sequence)
    }
}
