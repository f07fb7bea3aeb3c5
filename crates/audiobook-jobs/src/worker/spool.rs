//! Durable on-disk checkpoint of synthesized audio.
//!
//! Layout under `<spool>/<job_id>/`:
//! - `c{chapter}_{chunk}.wav`: one synthesized chunk of an unfinished chapter
//! - `c{chapter}.layout`: chunk count the chapter was split into
//! - `chapter_{chapter}.wav`: a finished chapter, its chunks concatenated
//!
//! Audio files are mono 32-bit float WAV. Every file is written to a
//! temporary name, synced and renamed into place, so a file that exists is
//! complete.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::engine::Synthesized;

/// Spool directory of one job.
#[derive(Debug, Clone)]
pub struct JobSpool {
    dir: PathBuf,
}

impl JobSpool {
    /// Opens (creating if needed) the spool of `job_id` under `root`.
    pub fn open(root: &Path, job_id: &str) -> io::Result<Self> {
        let dir = root.join(job_id);
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Refers to the spool of `job_id` without touching the filesystem.
    pub fn locate(root: &Path, job_id: &str) -> Self {
        Self {
            dir: root.join(job_id),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn chunk_path(&self, chapter: usize, chunk: usize) -> PathBuf {
        self.dir.join(format!("c{}_{}.wav", chapter, chunk))
    }

    pub fn chapter_path(&self, chapter: usize) -> PathBuf {
        self.dir.join(format!("chapter_{}.wav", chapter))
    }

    fn layout_path(&self, chapter: usize) -> PathBuf {
        self.dir.join(format!("c{}.layout", chapter))
    }

    pub fn has_chunk(&self, chapter: usize, chunk: usize) -> bool {
        self.chunk_path(chapter, chunk).is_file()
    }

    pub fn has_chapter(&self, chapter: usize) -> bool {
        self.chapter_path(chapter).is_file()
    }

    pub fn write_chunk(&self, chapter: usize, chunk: usize, audio: &Synthesized) -> io::Result<PathBuf> {
        let path = self.chunk_path(chapter, chunk);
        write_wav(&path, audio)?;
        Ok(path)
    }

    pub fn read_chunk(&self, chapter: usize, chunk: usize) -> io::Result<Synthesized> {
        read_wav(&self.chunk_path(chapter, chunk))
    }

    pub fn read_chapter(&self, chapter: usize) -> io::Result<Synthesized> {
        read_wav(&self.chapter_path(chapter))
    }

    /// Records how many chunks `chapter` was split into.
    pub fn write_layout(&self, chapter: usize, chunk_count: usize) -> io::Result<()> {
        let path = self.layout_path(chapter);
        let tmp = temp_path(&path);
        {
            let mut file = File::create(&tmp)?;
            file.write_all(chunk_count.to_string().as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)
    }

    pub fn layout(&self, chapter: usize) -> Option<usize> {
        fs::read_to_string(self.layout_path(chapter))
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    /// Concatenates the chunks of `chapter` into its chapter file and
    /// removes the chunk files.
    ///
    /// `default_rate` is used for a chapter without chunks.
    pub fn commit_chapter(
        &self,
        chapter: usize,
        chunk_count: usize,
        default_rate: u32,
    ) -> io::Result<PathBuf> {
        let mut combined = Synthesized {
            samples: Vec::new(),
            sample_rate: default_rate,
        };
        for chunk in 0..chunk_count {
            let audio = self.read_chunk(chapter, chunk)?;
            if chunk == 0 {
                combined.sample_rate = audio.sample_rate;
            } else if audio.sample_rate != combined.sample_rate {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "chunk {} of chapter {} is {} Hz, expected {} Hz",
                        chunk, chapter, audio.sample_rate, combined.sample_rate
                    ),
                ));
            }
            combined.samples.extend_from_slice(&audio.samples);
        }

        let path = self.chapter_path(chapter);
        write_wav(&path, &combined)?;

        for chunk in 0..chunk_count {
            remove_if_exists(&self.chunk_path(chapter, chunk))?;
        }
        remove_if_exists(&self.layout_path(chapter))?;
        Ok(path)
    }

    /// Drops everything spooled for a chapter.
    pub fn discard_chapter(&self, chapter: usize) -> io::Result<()> {
        remove_if_exists(&self.chapter_path(chapter))?;
        remove_if_exists(&self.layout_path(chapter))?;
        let prefix = format!("c{}_", chapter);
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().starts_with(&prefix) {
                remove_if_exists(&entry.path())?;
            }
        }
        Ok(())
    }

    /// Deletes the whole spool directory.
    pub fn remove(&self) -> io::Result<()> {
        match fs::remove_dir_all(&self.dir) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

fn spool_spec(sample_rate: u32) -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    }
}

fn write_wav(path: &Path, audio: &Synthesized) -> io::Result<()> {
    let tmp = temp_path(path);
    let mut writer = WavWriter::new(
        BufWriter::new(File::create(&tmp)?),
        spool_spec(audio.sample_rate),
    )
    .map_err(into_io)?;
    for &sample in &audio.samples {
        writer.write_sample(sample).map_err(into_io)?;
    }
    writer.finalize().map_err(into_io)?;

    File::open(&tmp)?.sync_all()?;
    fs::rename(&tmp, path)
}

fn read_wav(path: &Path) -> io::Result<Synthesized> {
    let mut reader = WavReader::open(path).map_err(into_io)?;
    let spec = reader.spec();
    if spec != spool_spec(spec.sample_rate) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{} is not a mono float spool file", path.display()),
        ));
    }
    let samples = reader
        .samples::<f32>()
        .collect::<Result<Vec<_>, _>>()
        .map_err(into_io)?;
    Ok(Synthesized {
        samples,
        sample_rate: spec.sample_rate,
    })
}

fn into_io(err: hound::Error) -> io::Error {
    match err {
        hound::Error::IoError(e) => e,
        other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
