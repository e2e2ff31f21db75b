//! Evaluation data dumps as NumPy `.npy` (format 1.0, little-endian f32).

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::learner::AgentMemory;

const MAGIC: &[u8] = b"\x93NUMPY";

/// Write a 2D row-major `<f4` array. Rows must all have `cols` entries.
pub fn write_npy_f32(path: &Path, rows: &[Vec<f32>], cols: usize) -> io::Result<()> {
    if let Some(bad) = rows.iter().position(|r| r.len() != cols) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("row {bad} has {} values, expected {cols}", rows[bad].len()),
        ));
    }

    let mut header = format!(
        "{{'descr': '<f4', 'fortran_order': False, 'shape': ({}, {}), }}",
        rows.len(),
        cols
    );
    // magic(6) + version(2) + header length(2) + header, padded to 64 bytes
    let unpadded = MAGIC.len() + 2 + 2 + header.len() + 1;
    header.push_str(&" ".repeat((64 - unpadded % 64) % 64));
    header.push('\n');
    let header_len = u16::try_from(header.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "npy header too long"))?;

    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(MAGIC)?;
    writer.write_all(&[1, 0])?;
    writer.write_all(&header_len.to_le_bytes())?;
    writer.write_all(header.as_bytes())?;
    for row in rows {
        for value in row {
            writer.write_all(&value.to_le_bytes())?;
        }
    }
    writer.flush()
}

/// Write `states_<agent>.npy`, `actions_<agent>.npy` and `messages_<agent>.npy`
/// for every agent into `dir`. Returns the files written.
pub fn dump_agent_memories(
    dir: &Path,
    agents: &[String],
    memories: &[AgentMemory],
) -> io::Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let mut written = Vec::with_capacity(agents.len() * 3);
    for (agent, memory) in agents.iter().zip(memories) {
        let actions: Vec<Vec<f32>> = memory.actions.iter().map(|a| a.to_row()).collect();
        for (kind, rows) in [
            ("states", &memory.states),
            ("actions", &actions),
            ("messages", &memory.messages),
        ] {
            let cols = rows.first().map(Vec::len).unwrap_or(0);
            let path = dir.join(format!("{kind}_{agent}.npy"));
            write_npy_f32(&path, rows, cols)?;
            written.push(path);
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Action;

    fn read_header(bytes: &[u8]) -> (usize, String) {
        assert_eq!(&bytes[..6], MAGIC);
        assert_eq!(&bytes[6..8], &[1, 0]);
        let len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        let header = String::from_utf8(bytes[10..10 + len].to_vec()).unwrap();
        (10 + len, header)
    }

    #[test]
    fn test_npy_header_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.npy");
        write_npy_f32(&path, &[vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]], 3).unwrap();

        let bytes = fs::read(&path).unwrap();
        let (data_start, header) = read_header(&bytes);
        assert_eq!(data_start % 64, 0);
        assert!(header.ends_with('\n'));
        assert!(header.contains("'descr': '<f4'"));
        assert!(header.contains("'shape': (2, 3)"));
        assert_eq!(bytes.len(), data_start + 6 * 4);

        let last = f32::from_le_bytes(bytes[bytes.len() - 4..].try_into().unwrap());
        assert_eq!(last, 6.0);
    }

    #[test]
    fn test_npy_rejects_ragged_rows() {
        let dir = tempfile::tempdir().unwrap();
        let err = write_npy_f32(&dir.path().join("x.npy"), &[vec![1.0], vec![]], 1).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_dump_agent_memories_names_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut memory = AgentMemory::new();
        for t in 0..4 {
            memory.states.push(vec![t as f32; 18]);
            memory.actions.push(Action::Discrete(t % 5));
            memory.messages.push(vec![1.0]);
        }
        let agents = vec!["agent_0".to_string(), "agent_1".to_string()];
        let written =
            dump_agent_memories(&dir.path().join("data"), &agents, &[memory.clone(), memory])
                .unwrap();
        assert_eq!(written.len(), 6);
        assert!(dir.path().join("data/states_agent_1.npy").exists());
        assert!(dir.path().join("data/messages_agent_0.npy").exists());

        let bytes = fs::read(dir.path().join("data/actions_agent_0.npy")).unwrap();
        let (_, header) = read_header(&bytes);
        assert!(header.contains("'shape': (4, 1)"));
    }
}
