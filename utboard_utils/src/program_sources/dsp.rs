//! Parser for the DSP program transfer format.
//!
//! The file is ASCII text framed by a ctrl-B start marker and a ctrl-C end marker. Inside, `$A`
//! followed by four hex digits moves the load address, and every other run of four hex digits is
//! one 16-bit word stored at the current address, which then advances by one. Words and address
//! markers may be separated by commas, spaces, or line endings.
use nom::{
    branch::alt,
    bytes::complete::{
        tag,
        take_while,
        take_while_m_n,
    },
    combinator::{
        eof,
        map,
        map_res,
    },
    multi::many0,
    sequence::{
        preceded,
        terminated,
    },
    IResult,
};
use std::{
    ffi::OsString,
    path::Path,
    str::from_utf8,
};
use thiserror::Error;

const START_MARKER: u8 = 0x02;
const END_MARKER: &[u8] = &[0x03];

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Program text is malformed at byte {0}")]
    ParseMatch(usize),
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Invalid UTF8 while parsing a hex number")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("Invalid integer")]
    Integer(#[from] std::num::ParseIntError),
}

/// A run of words loaded to consecutive addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Position in the file, counting every `$A` marker including those with no words after
    pub index: usize,
    /// Address of the first word
    pub start: u16,
    pub words: Vec<u16>,
}

impl Block {
    /// Sum of the words, truncated to 16 bits, as the remote computes it
    #[must_use]
    pub fn checksum(&self) -> u16 {
        self.words.iter().fold(0u16, |acc, w| acc.wrapping_add(*w))
    }

    /// Iterate over `(address, word)` pairs of this block
    #[allow(clippy::cast_possible_truncation)]
    pub fn addressed_words(&self) -> impl Iterator<Item = (u16, u16)> + '_ {
        self.words
            .iter()
            .enumerate()
            .map(|(i, w)| (self.start.wrapping_add(i as u16), *w))
    }
}

/// A parsed DSP program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    /// The non-empty address blocks, in file order
    pub blocks: Vec<Block>,
    pub md5: [u8; 16],
    pub filename: OsString,
}

impl Program {
    /// Total number of words across every block
    #[must_use]
    pub fn word_count(&self) -> usize {
        self.blocks.iter().map(|b| b.words.len()).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Address(u16),
    Word(u16),
}

fn is_separator(c: u8) -> bool {
    matches!(c, b'\r' | b'\n' | b',' | b' ' | START_MARKER)
}

fn from_hex(input: &[u8]) -> Result<u16, ParseError> {
    let in_str = from_utf8(input)?;
    let num = u16::from_str_radix(in_str, 16)?;
    Ok(num)
}

fn hex_word(input: &[u8]) -> IResult<&[u8], u16> {
    map_res(
        take_while_m_n(4, 4, |c: u8| c.is_ascii_hexdigit()),
        from_hex,
    )(input)
}

fn address(input: &[u8]) -> IResult<&[u8], Token> {
    map(preceded(tag("$A"), hex_word), Token::Address)(input)
}

fn word(input: &[u8]) -> IResult<&[u8], Token> {
    map(hex_word, Token::Word)(input)
}

fn end(input: &[u8]) -> IResult<&[u8], &[u8]> {
    preceded(take_while(is_separator), alt((tag(END_MARKER), eof)))(input)
}

fn program_text(input: &[u8]) -> IResult<&[u8], Vec<Token>> {
    terminated(
        many0(preceded(take_while(is_separator), alt((address, word)))),
        end,
    )(input)
}

fn into_blocks(tokens: Vec<Token>) -> Vec<Block> {
    let mut blocks = vec![];
    let mut current = Block {
        index: 0,
        start: 0,
        words: vec![],
    };
    // The current block was opened by a marker, so the next marker starts a new index
    let mut opened = false;
    for token in tokens {
        match token {
            Token::Address(start) => {
                let index = if opened || !current.words.is_empty() {
                    current.index + 1
                } else {
                    current.index
                };
                opened = true;
                let done = std::mem::replace(
                    &mut current,
                    Block {
                        index,
                        start,
                        words: vec![],
                    },
                );
                if !done.words.is_empty() {
                    blocks.push(done);
                }
            }
            Token::Word(w) => current.words.push(w),
        }
    }
    if !current.words.is_empty() {
        blocks.push(current);
    }
    blocks
}

/// Parse program text already in memory
/// # Errors
/// Returns an error if the text doesn't follow the transfer format
pub fn parse_program(contents: &[u8], filename: OsString) -> Result<Program, Error> {
    let md5 = md5::compute(contents);
    let (_, tokens) = program_text(contents).map_err(|e| {
        let offset = match e {
            nom::Err::Error(e) | nom::Err::Failure(e) => contents.len() - e.input.len(),
            nom::Err::Incomplete(_) => contents.len(),
        };
        Error::ParseMatch(offset)
    })?;
    Ok(Program {
        blocks: into_blocks(tokens),
        md5: md5.into(),
        filename,
    })
}

/// Reads a DSP program file
/// # Errors
/// Returns an error on unreadable or malformed files
pub fn read_dsp_program_file<T>(filename: T) -> Result<Program, Error>
where
    T: AsRef<Path>,
{
    let contents = std::fs::read(filename.as_ref())?;
    let name = filename
        .as_ref()
        .file_name()
        .map(ToOwned::to_owned)
        .unwrap_or_default();
    parse_program(&contents, name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_word() {
        let (remaining, w) = hex_word(b"1a2F,").unwrap();
        assert_eq!(remaining, b",");
        assert_eq!(w, 0x1A2F);
    }

    #[test]
    fn test_short_word_is_rejected() {
        assert!(hex_word(b"1a2,").is_err());
    }

    #[test]
    fn test_address() {
        let (remaining, tok) = address(b"$A0100\r\n").unwrap();
        assert_eq!(remaining, b"\r\n");
        assert_eq!(tok, Token::Address(0x0100));
    }

    #[test]
    fn test_program_blocks() {
        let text = b"\x02\r\n$A0000\r\n0001,0002, 0003\r\n$A0200\r\nFFFF,0001\r\n\x03trailing junk";
        let program = parse_program(text, "prog.hex".into()).unwrap();
        assert_eq!(
            program.blocks,
            vec![
                Block {
                    index: 0,
                    start: 0,
                    words: vec![1, 2, 3]
                },
                Block {
                    index: 1,
                    start: 0x200,
                    words: vec![0xFFFF, 1]
                },
            ]
        );
        assert_eq!(program.word_count(), 5);
    }

    #[test]
    fn test_words_before_first_address_start_at_zero() {
        let program = parse_program(b"\x021234,5678\x03", "p".into()).unwrap();
        assert_eq!(program.blocks.len(), 1);
        assert_eq!(program.blocks[0].start, 0);
    }

    #[test]
    fn test_block_index_counts_leading_words() {
        let program = parse_program(b"\x020001 $A0010 0002\x03", "p".into()).unwrap();
        let indices: Vec<_> = program.blocks.iter().map(|b| b.index).collect();
        assert_eq!(indices, vec![0, 1]);
    }

    #[test]
    fn test_empty_blocks_are_dropped() {
        let program = parse_program(b"\x02$A0010$A0020 0042\x03", "p".into()).unwrap();
        assert_eq!(
            program.blocks,
            vec![Block {
                index: 1,
                start: 0x20,
                words: vec![0x42]
            }]
        );
    }

    #[test]
    fn test_missing_end_marker_is_accepted() {
        let program = parse_program(b"\x02$A0000 0001\r\n", "p".into()).unwrap();
        assert_eq!(program.word_count(), 1);
    }

    #[test]
    fn test_garbage_is_reported() {
        assert!(matches!(
            parse_program(b"\x02$A0000 00G1\x03", "p".into()),
            Err(Error::ParseMatch(_))
        ));
    }

    #[test]
    fn test_checksum_wraps() {
        let block = Block {
            index: 0,
            start: 0x10,
            words: vec![0xFFFF, 0x0002, 0x0010],
        };
        assert_eq!(block.checksum(), 0x0011);
        let addrs: Vec<_> = block.addressed_words().map(|(a, _)| a).collect();
        assert_eq!(addrs, vec![0x10, 0x11, 0x12]);
    }
}
