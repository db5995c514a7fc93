//! Lazy iteration over the elements of a top-level JSON array.
//!
//! [`JsonArrayReader`] consumes `[`, then one element at a time separated by
//! `,`, then `]`, deserializing each element as it is reached. Only the
//! current element is ever resident, so multi-megabyte artifacts can be
//! loaded row by row.
//!
//! Elements must be JSON objects or arrays: their closing bracket ends the
//! value without the decoder having to peek past it.

use anyhow::{anyhow, bail, Result};
use serde::de::DeserializeOwned;
use std::io::BufRead;
use std::marker::PhantomData;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    First,
    Next,
    Done,
}

pub struct JsonArrayReader<R, T> {
    reader: R,
    state: State,
    _marker: PhantomData<fn() -> T>,
}

impl<R: BufRead, T: DeserializeOwned> JsonArrayReader<R, T> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            state: State::Start,
            _marker: PhantomData,
        }
    }

    /// Skip whitespace and return the next byte without consuming it.
    fn peek(&mut self) -> Result<Option<u8>> {
        loop {
            let buf = self.reader.fill_buf()?;
            if buf.is_empty() {
                return Ok(None);
            }
            let skip = buf.iter().take_while(|b| b.is_ascii_whitespace()).count();
            if skip < buf.len() {
                let byte = buf[skip];
                self.reader.consume(skip);
                return Ok(Some(byte));
            }
            let all = buf.len();
            self.reader.consume(all);
        }
    }

    fn consume_byte(&mut self, want: u8) -> Result<()> {
        match self.peek()? {
            Some(b) if b == want => {
                self.reader.consume(1);
                Ok(())
            }
            Some(b) => bail!("expected '{}', found '{}'", want as char, b as char),
            None => bail!("expected '{}', found end of input", want as char),
        }
    }

    fn read_element(&mut self) -> Result<T> {
        let mut de = serde_json::Deserializer::from_reader(&mut self.reader);
        T::deserialize(&mut de).map_err(|e| anyhow!("invalid array element: {}", e))
    }

    fn advance(&mut self) -> Result<Option<T>> {
        if self.state == State::Start {
            self.consume_byte(b'[')?;
            self.state = State::First;
        }

        match (self.state, self.peek()?) {
            (State::Done, _) => Ok(None),
            (_, Some(b']')) => {
                self.reader.consume(1);
                self.state = State::Done;
                if self.peek()?.is_some() {
                    bail!("trailing data after closing ']'");
                }
                Ok(None)
            }
            (State::First, Some(b'{' | b'[')) => {
                self.state = State::Next;
                self.read_element().map(Some)
            }
            (State::Next, Some(b',')) => {
                self.reader.consume(1);
                match self.peek()? {
                    Some(b'{' | b'[') => self.read_element().map(Some),
                    Some(b) => bail!("expected object after ',', found '{}'", b as char),
                    None => bail!("unterminated array"),
                }
            }
            (_, Some(b)) => bail!("unexpected '{}' in array", b as char),
            (_, None) => bail!("unterminated array"),
        }
    }
}

impl<R: BufRead, T: DeserializeOwned> Iterator for JsonArrayReader<R, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state == State::Done {
            return None;
        }
        match self.advance() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(e) => {
                self.state = State::Done;
                Some(Err(e))
            }
        }
    }
}
