use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt, SeekFrom};

/// Reads the last non-empty line of a file by scanning backwards from its end, one `buffer`
/// sized chunk at a time. Trailing newlines are ignored. Leaves the cursor at an unspecified
/// position.
pub async fn read_last_line(
    file: &mut (impl AsyncSeek + AsyncRead + Unpin),
    buffer: &mut [u8],
) -> Result<Option<String>, io::Error> {
    let mut position = file.seek(SeekFrom::End(0)).await?;
    // Bytes from `position` up to the end of the file.
    let mut tail = Vec::<u8>::new();
    loop {
        let content_end = tail.iter().rposition(|v| *v != b'\n').map(|v| v + 1);
        if let Some(end) = content_end {
            if let Some(start) = tail[..end].iter().rposition(|v| *v == b'\n') {
                return Ok(Some(String::from_utf8_lossy(&tail[start + 1..end]).into_owned()));
            }
        }
        if position == 0 || buffer.is_empty() {
            return Ok(content_end.map(|end| String::from_utf8_lossy(&tail[..end]).into_owned()));
        }

        let chunk = u64::min(position, buffer.len() as u64) as usize;
        position -= chunk as u64;
        file.seek(SeekFrom::Start(position)).await?;
        file.read_exact(&mut buffer[..chunk]).await?;
        tail.splice(0..0, buffer[..chunk].iter().copied());
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use anyhow::Result;
    use tempfile::tempfile;

    use super::read_last_line;

    async fn last_line_of(content: &str, buffer_size: usize) -> Result<Option<String>> {
        let mut file = tempfile()?;
        file.write_all(content.as_bytes())?;
        let mut file = tokio::fs::File::from_std(file);
        Ok(read_last_line(&mut file, vec![0; buffer_size].as_mut_slice()).await?)
    }

    #[tokio::test]
    async fn test_last_line_basic() -> Result<()> {
        let content = "{\"id\":1}\n{\"id\":2}\n{\"id\":3}";
        assert_eq!(last_line_of(content, 1024).await?.as_deref(), Some("{\"id\":3}"));
        Ok(())
    }

    #[tokio::test]
    async fn test_last_line_ignores_trailing_newlines() -> Result<()> {
        let content = "first\nsecond\n\n";
        assert_eq!(last_line_of(content, 1024).await?.as_deref(), Some("second"));
        Ok(())
    }

    #[tokio::test]
    async fn test_last_line_small_buffer() -> Result<()> {
        let content = "test hello theere\ntest hello there\nhow do you do\n";
        assert_eq!(last_line_of(content, 2).await?.as_deref(), Some("how do you do"));
        assert_eq!(last_line_of("single", 3).await?.as_deref(), Some("single"));
        Ok(())
    }

    #[tokio::test]
    async fn test_last_line_empty() -> Result<()> {
        assert_eq!(last_line_of("", 16).await?, None);
        assert_eq!(last_line_of("\n\n", 16).await?, None);
        Ok(())
    }
}
