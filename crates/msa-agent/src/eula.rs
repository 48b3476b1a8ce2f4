use std::path::Path;

use crate::error::{ConflictReason, IoContext, Result, SupervisorError};

pub const EULA_FILE: &str = "eula.txt";

const ACCEPTED: &str = "eula=true";
const DECLINED: &str = "eula=false";
const HEADER: &str = "#By changing the setting below to TRUE you are indicating your agreement to our EULA (https://aka.ms/MinecraftEULA).";

pub async fn is_accepted(instance_dir: &Path) -> bool {
    match tokio::fs::read(instance_dir.join(EULA_FILE)).await {
        Ok(raw) => String::from_utf8_lossy(&raw).contains(ACCEPTED),
        Err(_) => false,
    }
}

fn fresh_eula(now: chrono::DateTime<chrono::Utc>) -> String {
    format!(
        "{HEADER}\n#{}\n{ACCEPTED}\n",
        now.format("%a %b %d %H:%M:%S UTC %Y")
    )
}

/// Flips `eula=false` to `eula=true` in place, or writes a new file.
///
/// Everything other than the flag is preserved, so comments the server wrote
/// survive the edit. A file that is not UTF-8 is refused untouched.
pub async fn agree(instance_dir: &Path) -> Result<()> {
    let path = instance_dir.join(EULA_FILE);

    let existing = match tokio::fs::read(&path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tokio::fs::write(&path, fresh_eula(chrono::Utc::now()))
                .await
                .io_context(|| format!("write {}", path.display()))?;
            tracing::info!(path = %path.display(), "eula created as accepted");
            return Ok(());
        }
        Err(e) => return Err(SupervisorError::io(format!("read {}", path.display()), e)),
    };

    let text = String::from_utf8(existing).map_err(|e| {
        SupervisorError::io(
            format!("read {}", path.display()),
            std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        )
    })?;
    if !text.contains(DECLINED) {
        return Err(SupervisorError::Conflict(ConflictReason::AlreadyAgreed));
    }

    tokio::fs::write(&path, text.replace(DECLINED, ACCEPTED))
        .await
        .io_context(|| format!("write {}", path.display()))?;
    tracing::info!(path = %path.display(), "eula flipped to accepted");
    Ok(())
}
