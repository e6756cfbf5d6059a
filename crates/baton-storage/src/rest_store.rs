use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{validate_name, BlobStore, Result, StoreError};

/// Header carrying the artifact's member file name; restore logic relies on
/// the extension chain (`.zst`, `.enc`) surviving the round trip.
const FILE_NAME_HEADER: &str = "X-Artifact-Filename";
const RETENTION_HEADER: &str = "X-Retention-Days";

/// HTTP artifact store. Single-file artifacts live at
/// `{base}/artifacts/{name}`; the member file name travels in a header.
pub struct RestStore {
    base_url: String,
    agent: ureq::Agent,
    token: Option<String>,
}

impl RestStore {
    pub fn new(base_url: &str, token: Option<&str>) -> Self {
        // Chunk transfers run for minutes; generous read/write timeouts.
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(30))
            .timeout_read(Duration::from_secs(1800))
            .timeout_write(Duration::from_secs(1800))
            .build();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            agent,
            token: token.map(|t| t.to_string()),
        }
    }

    fn url(&self, name: &str) -> String {
        format!("{}/artifacts/{}", self.base_url, name)
    }

    fn apply_auth(&self, req: ureq::Request) -> ureq::Request {
        match &self.token {
            Some(token) => req.set("Authorization", &format!("Bearer {token}")),
            None => req,
        }
    }
}

impl BlobStore for RestStore {
    fn upload(&self, name: &str, file: &Path, retention_days: Option<u32>) -> Result<()> {
        validate_name(name)?;
        let file_name = file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StoreError::Other(format!("no file name in {}", file.display())))?;

        let reader = BufReader::new(File::open(file)?);
        let mut req = self
            .apply_auth(self.agent.put(&self.url(name)))
            .set(FILE_NAME_HEADER, file_name);
        if let Some(days) = retention_days {
            req = req.set(RETENTION_HEADER, &days.to_string());
        }
        req.send(reader)?;
        Ok(())
    }

    fn download(&self, name: &str, dest_dir: &Path) -> Result<PathBuf> {
        validate_name(name)?;
        let resp = match self.apply_auth(self.agent.get(&self.url(name))).call() {
            Ok(resp) => resp,
            Err(ureq::Error::Status(404, _)) => {
                return Err(StoreError::NotFound(name.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let file_name = resp
            .header(FILE_NAME_HEADER)
            .map(str::to_string)
            .ok_or_else(|| {
                StoreError::Other(format!("artifact '{name}': missing {FILE_NAME_HEADER}"))
            })?;
        if file_name.contains('/') || file_name.contains('\\') {
            return Err(StoreError::Other(format!(
                "artifact '{name}': unsafe member file name '{file_name}'"
            )));
        }

        let dest = dest_dir.join(&file_name);
        let mut writer = BufWriter::new(File::create(&dest)?);
        std::io::copy(&mut resp.into_reader(), &mut writer)?;
        writer
            .into_inner()
            .map_err(|e| StoreError::Io(e.into_error()))?;
        Ok(dest)
    }

    fn delete(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        match self.apply_auth(self.agent.delete(&self.url(name))).call() {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(404, _)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, name: &str) -> Result<bool> {
        validate_name(name)?;
        match self.apply_auth(self.agent.head(&self.url(name))).call() {
            Ok(_) => Ok(true),
            Err(ureq::Error::Status(404, _)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
