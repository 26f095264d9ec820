use std::{cell::Cell, io::Read};

pub(crate) struct ProgressRead<'a, R>
where
    R: Read,
{
    reader: R,
    counter: &'a Cell<u64>,
}

impl<'a, R> ProgressRead<'a, R>
where
    R: Read,
{
    pub fn new(reader: R, counter: &'a Cell<u64>) -> Self {
        Self { reader, counter }
    }
}

impl<R> Read for ProgressRead<'_, R>
where
    R: Read,
{
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let amt = self.reader.read(buf)?;
        self.counter.set(self.counter.get() + amt as u64);
        Ok(amt)
    }
}
