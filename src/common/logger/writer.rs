use std::{
    fs::{File, OpenOptions},
    io::{self, BufRead, BufReader, Write},
    path::Path,
    sync::Arc,
};

use parking_lot::Mutex;

/// Appends log output to a file and trims the oldest lines once the file
/// grows past `max_lines`.
#[derive(Clone)]
pub struct CircularFileWriter {
    path: String,
    max_lines: u32,
    lines_since_prune: Arc<Mutex<u32>>,
}

impl CircularFileWriter {
    pub fn new(path: String, max_lines: u32) -> Self {
        Self {
            path,
            max_lines,
            lines_since_prune: Arc::new(Mutex::new(0)),
        }
    }

    fn prune_threshold(&self) -> u32 {
        (self.max_lines / 10).max(50)
    }

    fn prune(&self) -> io::Result<()> {
        if !Path::new(&self.path).exists() {
            return Ok(());
        }

        let reader = BufReader::new(File::open(&self.path)?);
        let lines: Vec<String> = reader.lines().collect::<Result<_, _>>()?;

        if lines.len() > self.max_lines as usize {
            let start = lines.len() - self.max_lines as usize;
            let mut file = File::create(&self.path)?;
            for line in &lines[start..] {
                writeln!(file, "{}", line)?;
            }
        }
        Ok(())
    }
}

impl io::Write for CircularFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?
            .write_all(buf)?;

        let mut pending = self.lines_since_prune.lock();
        *pending += buf.iter().filter(|&&b| b == b'\n').count() as u32;

        if *pending >= self.prune_threshold() {
            if let Err(e) = self.prune() {
                eprintln!("Failed to prune log file: {}", e);
            }
            *pending = 0;
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CircularFileWriter {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
