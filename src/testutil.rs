use std::collections::VecDeque;
use std::io::{self, Read, Write};

/// In-memory connection that hands out reads exactly as scripted and keeps
/// everything written to it.
///
/// Each scripted entry is returned by one `read` call (split if the caller's
/// buffer is smaller). An exhausted script reads as EOF, or as the error set
/// with [`ScriptedStream::fail_with`].
#[derive(Debug, Default)]
pub struct ScriptedStream {
    reads: VecDeque<Vec<u8>>,
    exhausted: Option<io::ErrorKind>,
    pub written: Vec<u8>,
}

impl ScriptedStream {
    pub fn new<I: IntoIterator<Item = Vec<u8>>>(reads: I) -> Self {
        Self {
            reads: reads.into_iter().collect(),
            exhausted: None,
            written: Vec::new(),
        }
    }

    /// Fail every read after the script runs out, like a socket read timeout.
    pub fn fail_with(mut self, kind: io::ErrorKind) -> Self {
        self.exhausted = Some(kind);
        self
    }

    pub fn remaining_reads(&self) -> usize {
        self.reads.len()
    }
}

impl Read for ScriptedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(mut next) = self.reads.pop_front() else {
            return match self.exhausted {
                Some(kind) => Err(kind.into()),
                None => Ok(0),
            };
        };
        if next.len() > buf.len() {
            let rest = next.split_off(buf.len());
            self.reads.push_front(rest);
        }
        buf[..next.len()].copy_from_slice(&next);
        Ok(next.len())
    }
}

impl Write for ScriptedStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
