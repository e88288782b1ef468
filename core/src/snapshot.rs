//! Checkpoint files: the valid CDF prefix plus a scalars record.
//!
//! A checkpoint for system `id` is two files in its save directory:
//!   CDF{id}.txt       one value per line, Z(0..=time), exact text form
//!   Scalars{id}.json  time, beta, tMax, id, save_dir (+ saved_at)
//!
//! RULES:
//!   - Both files are written to temp names and synced before either is
//!     renamed into place.
//!   - The scalars file is the commit record and is renamed last. Until it
//!     is, the previous prefix is kept as `CDF{id}.txt.bak`, and `load`
//!     falls back to it when the prefix disagrees with the recorded time.
//!   - A failed save leaves the previous checkpoint loadable.
//!   - A missing file is `NotFound`; anything unreadable or inconsistent is
//!     `Corrupt`. Callers rely on telling the two apart.

use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::{PersistenceError, SimResult},
    numeric::Quad,
    types::{SystemId, Time},
};

/// Attempts per file before a write failure is surfaced.
pub const WRITE_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalarRecord {
    pub time:     Time,
    #[serde(with = "beta_text")]
    pub beta:     f64,
    #[serde(rename = "tMax")]
    pub t_max:    Time,
    #[serde(deserialize_with = "id_text")]
    pub id:       SystemId,
    pub save_dir: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
}

impl ScalarRecord {
    fn validate(&self, path: &Path) -> SimResult<()> {
        if self.t_max == 0 {
            return Err(corrupt(path, "tMax is zero"));
        }
        if self.time > self.t_max {
            return Err(corrupt(
                path,
                format!("time {} exceeds tMax {}", self.time, self.t_max),
            ));
        }
        if self.beta.is_nan() || self.beta < 0.0 {
            return Err(corrupt(path, format!("invalid beta {}", self.beta)));
        }
        Ok(())
    }
}

/// A loaded checkpoint: the record and the saved prefix.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub record: ScalarRecord,
    pub cdf:    Vec<Quad>,
}

/// `(CDF{id}.txt, Scalars{id}.json)` inside `save_dir`.
pub fn checkpoint_paths(save_dir: &Path, id: &str) -> (PathBuf, PathBuf) {
    (
        save_dir.join(format!("CDF{id}.txt")),
        save_dir.join(format!("Scalars{id}.json")),
    )
}

/// Write both files for `record`. Returns their paths.
pub fn save(record: &ScalarRecord, prefix: &[Quad]) -> SimResult<(PathBuf, PathBuf)> {
    let (cdf_path, scalars_path) = checkpoint_paths(&record.save_dir, &record.id);

    let mut cdf_text = String::with_capacity(prefix.len() * 48);
    for z in prefix {
        // Writing to a String cannot fail.
        let _ = writeln!(cdf_text, "{z}");
    }
    let json = serde_json::to_string_pretty(record)?;

    // Stage both files before touching the committed pair.
    let cdf_temp = stage_with_retry(&cdf_path, cdf_text.as_bytes())?;
    let scalars_temp = match stage_with_retry(&scalars_path, json.as_bytes()) {
        Ok(temp) => temp,
        Err(e) => {
            discard(&cdf_temp);
            return Err(e);
        }
    };
    commit(&cdf_path, &cdf_temp, &scalars_path, &scalars_temp)?;

    log::debug!(
        "checkpoint saved: id={} time={} -> {}",
        record.id,
        record.time,
        scalars_path.display()
    );
    Ok((cdf_path, scalars_path))
}

/// Read and cross-check both files.
///
/// A prefix that is missing or disagrees with the recorded time falls back
/// to the backup kept while a save is being committed.
pub fn load(cdf_file: &Path, scalars_file: &Path) -> SimResult<Checkpoint> {
    let scalars_text = read_checkpoint_file(scalars_file)?;
    let record: ScalarRecord = serde_json::from_str(&scalars_text)
        .map_err(|e| corrupt(scalars_file, e.to_string()))?;
    record.validate(scalars_file)?;

    let cdf = match read_prefix(cdf_file, record.time) {
        Ok(cdf) => cdf,
        Err(err) => {
            let backup = backup_path(cdf_file);
            match read_prefix(&backup, record.time) {
                Ok(cdf) => {
                    log::warn!("{err}; using {}", backup.display());
                    cdf
                }
                Err(_) => return Err(err),
            }
        }
    };

    log::info!(
        "checkpoint loaded: id={} time={} tMax={} beta={}",
        record.id,
        record.time,
        record.t_max,
        record.beta
    );
    Ok(Checkpoint { record, cdf })
}

fn read_prefix(path: &Path, time: Time) -> SimResult<Vec<Quad>> {
    let text = read_checkpoint_file(path)?;
    let cdf = parse_prefix(path, &text)?;

    let expected = time + 1;
    if cdf.len() as u64 != expected {
        return Err(corrupt(
            path,
            format!("holds {} values but time {time} needs {expected}", cdf.len()),
        ));
    }
    if cdf[0] != Quad::ONE {
        return Err(corrupt(path, format!("first entry is {}, expected 1", cdf[0])));
    }
    Ok(cdf)
}

fn parse_prefix(path: &Path, text: &str) -> SimResult<Vec<Quad>> {
    text.lines()
        .enumerate()
        .map(|(i, line)| {
            let z: Quad = line
                .parse()
                .map_err(|e| corrupt(path, format!("line {}: {e}", i + 1)))?;
            if !z.is_finite() {
                return Err(corrupt(path, format!("line {}: non-finite value", i + 1)));
            }
            Ok(z)
        })
        .collect()
}

fn read_checkpoint_file(path: &Path) -> SimResult<String> {
    fs::read_to_string(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => PersistenceError::NotFound { path: path.to_path_buf() }.into(),
        _ => corrupt(path, format!("unreadable: {e}")),
    })
}

pub(crate) fn corrupt(path: &Path, reason: impl Into<String>) -> crate::error::SimError {
    PersistenceError::Corrupt {
        path:   path.to_path_buf(),
        reason: reason.into(),
    }
    .into()
}

fn write_error(path: &Path, source: io::Error) -> crate::error::SimError {
    PersistenceError::Write { path: path.to_path_buf(), source }.into()
}

/// `.tmp_{pid}_{name}` next to `path`.
fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|s| s.to_string_lossy())
        .unwrap_or_default();
    parent_dir(path).join(format!(".tmp_{}_{name}", std::process::id()))
}

/// `{name}.bak` next to `path`. Present only while a save is committing.
fn backup_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|s| s.to_string_lossy())
        .unwrap_or_default();
    parent_dir(path).join(format!("{name}.bak"))
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

fn stage_with_retry(path: &Path, data: &[u8]) -> SimResult<PathBuf> {
    let mut attempt = 1;
    loop {
        match stage(path, data) {
            Ok(temp) => return Ok(temp),
            Err(source) if attempt >= WRITE_ATTEMPTS => return Err(write_error(path, source)),
            Err(e) => {
                log::warn!(
                    "checkpoint write to {} failed (attempt {attempt}/{WRITE_ATTEMPTS}): {e}",
                    path.display()
                );
                attempt += 1;
            }
        }
    }
}

/// Write `data` to the temp name for `path` and sync it. The temp file is
/// removed again if any of that fails.
fn stage(path: &Path, data: &[u8]) -> io::Result<PathBuf> {
    fs::create_dir_all(parent_dir(path))?;
    let temp = temp_path(path);
    let written = File::create(&temp).and_then(|mut file| {
        file.write_all(data)?;
        file.sync_all()
    });
    match written {
        Ok(()) => Ok(temp),
        Err(e) => {
            if temp.is_file() {
                discard(&temp);
            }
            Err(e)
        }
    }
}

/// Move both staged files into place.
///
/// The previous prefix is parked as a backup until the scalars file, the
/// commit record, has been renamed. If that rename fails the backup goes
/// back, so the last good checkpoint still loads.
fn commit(cdf_path: &Path, cdf_temp: &Path, scalars_path: &Path, scalars_temp: &Path) -> SimResult<()> {
    let backup = backup_path(cdf_path);
    let had_previous = cdf_path.is_file();

    if had_previous {
        if let Err(source) = fs::rename(cdf_path, &backup) {
            discard(cdf_temp);
            discard(scalars_temp);
            return Err(write_error(cdf_path, source));
        }
    }
    if let Err(source) = fs::rename(cdf_temp, cdf_path) {
        restore_previous(cdf_path, &backup, had_previous);
        discard(cdf_temp);
        discard(scalars_temp);
        return Err(write_error(cdf_path, source));
    }
    if let Err(source) = fs::rename(scalars_temp, scalars_path) {
        restore_previous(cdf_path, &backup, had_previous);
        discard(scalars_temp);
        return Err(write_error(scalars_path, source));
    }
    if had_previous {
        discard(&backup);
    }
    Ok(())
}

fn restore_previous(cdf_path: &Path, backup: &Path, had_previous: bool) {
    let restored = if had_previous {
        fs::rename(backup, cdf_path)
    } else {
        fs::remove_file(cdf_path)
    };
    if let Err(e) = restored {
        if e.kind() != io::ErrorKind::NotFound {
            log::warn!("could not restore {}: {e}", cdf_path.display());
        }
    }
}

fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        log::warn!("could not remove {}: {e}", path.display());
    }
}

/// Non-finite beta is written as a string; JSON has no infinity.
mod beta_text {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(beta: &f64, s: S) -> Result<S::Ok, S::Error> {
        if beta.is_finite() {
            s.serialize_f64(*beta)
        } else {
            s.collect_str(beta)
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        match Repr::deserialize(d)? {
            Repr::Number(v) => Ok(v),
            Repr::Text(t) => t.parse::<f64>().map_err(serde::de::Error::custom),
        }
    }
}

/// Ids were historically integers; accept both forms.
fn id_text<'de, D: serde::Deserializer<'de>>(d: D) -> Result<SystemId, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Text(String),
        Signed(i64),
        Unsigned(u64),
    }
    Ok(match Repr::deserialize(d)? {
        Repr::Text(s) => s,
        Repr::Signed(n) => n.to_string(),
        Repr::Unsigned(n) => n.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SimError;

    fn record_at(dir: &Path, time: Time) -> ScalarRecord {
        ScalarRecord {
            time,
            beta:     1.0,
            t_max:    50,
            id:       "p".into(),
            save_dir: dir.to_path_buf(),
            saved_at: None,
        }
    }

    fn prefix_of(len: usize) -> Vec<Quad> {
        let mut z = vec![Quad::from(0.5); len];
        z[0] = Quad::ONE;
        z
    }

    #[test]
    fn failed_scalars_write_keeps_previous_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let (cdf_path, scalars_path) = save(&record_at(dir.path(), 10), &prefix_of(11)).unwrap();

        // A directory on the temp name makes every scalars attempt fail.
        fs::create_dir(temp_path(&scalars_path)).unwrap();
        let err = save(&record_at(dir.path(), 20), &prefix_of(21)).unwrap_err();
        assert!(
            matches!(err, SimError::Persistence(PersistenceError::Write { .. })),
            "{err}"
        );

        let loaded = load(&cdf_path, &scalars_path).unwrap();
        assert_eq!(loaded.record.time, 10);
        assert_eq!(loaded.cdf.len(), 11);
        assert!(!temp_path(&cdf_path).exists(), "staged prefix left behind");
        assert!(!backup_path(&cdf_path).exists());
    }

    #[test]
    fn interrupted_commit_loads_from_backup() {
        let dir = tempfile::tempdir().unwrap();
        let (cdf_path, scalars_path) = save(&record_at(dir.path(), 3), &prefix_of(4)).unwrap();

        // New prefix in place, scalars still at the old time.
        fs::rename(&cdf_path, backup_path(&cdf_path)).unwrap();
        let newer: String = prefix_of(9).iter().map(|z| format!("{z}\n")).collect();
        fs::write(&cdf_path, newer).unwrap();

        let loaded = load(&cdf_path, &scalars_path).unwrap();
        assert_eq!(loaded.record.time, 3);
        assert_eq!(loaded.cdf, prefix_of(4));

        // A later successful save clears the backup.
        save(&record_at(dir.path(), 8), &prefix_of(9)).unwrap();
        assert!(!backup_path(&cdf_path).exists());
        assert_eq!(load(&cdf_path, &scalars_path).unwrap().record.time, 8);
    }

    #[test]
    fn record_accepts_integer_id_and_string_beta() {
        let json = r#"{"time": 3, "beta": "inf", "tMax": 10, "id": 7, "save_dir": "."}"#;
        let record: ScalarRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.id, "7");
        assert!(record.beta.is_infinite());
        assert_eq!(record.t_max, 10);
        assert!(record.saved_at.is_none());
    }

    #[test]
    fn record_writes_infinite_beta_as_text() {
        let record = ScalarRecord {
            time:     0,
            beta:     f64::INFINITY,
            t_max:    1,
            id:       "a".into(),
            save_dir: PathBuf::from("."),
            saved_at: None,
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains(r#""beta":"inf""#), "{json}");
        assert!(json.contains(r#""tMax":1"#), "{json}");
        let back: ScalarRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn prefix_rejects_garbage_lines() {
        let path = Path::new("CDFx.txt");
        assert!(parse_prefix(path, "1e0\n5e-1\n").is_ok());
        assert!(parse_prefix(path, "1e0\n\n").is_err());
        assert!(parse_prefix(path, "1e0\nNaN\n").is_err());
    }
}
