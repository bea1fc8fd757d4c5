//! JSONL storage backend, one open writer per partition path (§4.1, §6).

use super::naming::partition_path;
use super::Sink;
use crate::config::{DatePartition, NamingPolicy};
use crate::error::{CoreError, Result};
use crate::event::MarketEvent;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

enum PartitionWriter {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl Write for PartitionWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            PartitionWriter::Plain(w) => w.write(buf),
            PartitionWriter::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            PartitionWriter::Plain(w) => w.flush(),
            PartitionWriter::Gzip(w) => w.flush(),
        }
    }
}

pub struct JsonlSink {
    data_root: PathBuf,
    naming_policy: NamingPolicy,
    date_partition: DatePartition,
    compress: bool,
    open_partitions: HashMap<PathBuf, PartitionWriter>,
}

impl JsonlSink {
    pub fn new(
        data_root: impl Into<PathBuf>,
        naming_policy: NamingPolicy,
        date_partition: DatePartition,
        compress: bool,
    ) -> Self {
        Self {
            data_root: data_root.into(),
            naming_policy,
            date_partition,
            compress,
            open_partitions: HashMap::new(),
        }
    }

    fn writer_for(&mut self, path: &Path) -> Result<&mut PartitionWriter> {
        if !self.open_partitions.contains_key(path) {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(CoreError::Io)?;
            }
            let target = if self.compress {
                path.with_extension("jsonl.gz")
            } else {
                path.to_path_buf()
            };
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&target)
                .map_err(CoreError::Io)?;
            let writer = if self.compress {
                PartitionWriter::Gzip(GzEncoder::new(BufWriter::new(file), Compression::default()))
            } else {
                PartitionWriter::Plain(BufWriter::new(file))
            };
            self.open_partitions.insert(path.to_path_buf(), writer);
        }
        Ok(self.open_partitions.get_mut(path).unwrap())
    }
}

impl Sink for JsonlSink {
    fn append(&mut self, event: &MarketEvent) -> Result<()> {
        let path = partition_path(
            &self.data_root,
            self.naming_policy,
            self.date_partition,
            event,
        );
        let line = serde_json::to_string(event).map_err(CoreError::Serde)?;
        let writer = self.writer_for(&path)?;
        writer.write_all(line.as_bytes()).map_err(CoreError::Io)?;
        writer.write_all(b"\n").map_err(CoreError::Io)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        for writer in self.open_partitions.values_mut() {
            writer.flush().map_err(CoreError::Io)?;
        }
        Ok(())
    }

    fn dispose(&mut self) -> Result<()> {
        self.flush()?;
        self.open_partitions.clear();
        Ok(())
    }
}
