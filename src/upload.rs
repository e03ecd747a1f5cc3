use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use clap::ValueEnum;
use reqwest::blocking::Client;
use reqwest::blocking::multipart::{Form, Part};
use reqwest::header::{HeaderMap, HeaderValue, SET_COOKIE, USER_AGENT};
use serde::Serialize;
use tracing::info;

use crate::domain::archive_stem;
use crate::error::AggregatorError;
use crate::fs_util;

/// Bundles larger than this are posted in parts.
pub const DEFAULT_PART_BYTES: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Server {
    Dev,
    Prod,
    LocalDebug,
}

impl Server {
    pub fn base_url(&self) -> &'static str {
        match self {
            Server::Dev => "https://dev.ampliconrepository.org/",
            Server::Prod => "https://ampliconrepository.org/",
            Server::LocalDebug => "http://127.0.0.1:8000/",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectMetadata {
    pub project_name: String,
    pub description: String,
    pub publication_link: String,
    pub private: bool,
    pub project_members: Vec<String>,
    pub accept_license: bool,
}

impl ProjectMetadata {
    pub fn new(project_name: impl Into<String>, description: impl Into<String>, username: &str) -> Self {
        Self {
            project_name: project_name.into(),
            description: description.into(),
            publication_link: String::new(),
            private: true,
            project_members: vec![username.to_string()],
            accept_license: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadReceipt {
    pub file: String,
    pub project_name: String,
    pub server: Server,
    pub parts: usize,
    pub status: u16,
    /// RFC 3339.
    pub uploaded_at: String,
}

pub trait UploadClient {
    fn upload(&self, bundle: &Path, metadata: &ProjectMetadata) -> Result<UploadReceipt, AggregatorError>;
}

pub struct HttpUploadClient {
    client: Client,
    server: Server,
    part_bytes: u64,
}

impl HttpUploadClient {
    pub fn new(server: Server) -> Result<Self, AggregatorError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("amplicon-agg/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| AggregatorError::Filesystem(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(3600))
            .build()
            .map_err(|err| AggregatorError::UploadHttp(err.to_string()))?;
        Ok(Self {
            client,
            server,
            part_bytes: DEFAULT_PART_BYTES,
        })
    }

    pub fn with_part_bytes(mut self, part_bytes: u64) -> Self {
        self.part_bytes = part_bytes.max(1);
        self
    }

    fn csrf_token(&self) -> Result<String, AggregatorError> {
        let response = self
            .client
            .get(self.server.base_url())
            .send()
            .map_err(|err| AggregatorError::UploadHttp(err.to_string()))?;
        response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find_map(csrf_from_cookie)
            .ok_or_else(|| AggregatorError::UploadHttp("server did not set a csrftoken cookie".to_string()))
    }

    fn post_part(
        &self,
        token: &str,
        part: &Path,
        index: usize,
        count: usize,
        metadata: &ProjectMetadata,
    ) -> Result<u16, AggregatorError> {
        let file_name = part
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "bundle.tar.gz".to_string());
        let file = File::open(part).map_err(|err| AggregatorError::Filesystem(err.to_string()))?;
        let mut form = Form::new()
            .text("project_name", metadata.project_name.clone())
            .text("description", metadata.description.clone())
            .text("publication_link", metadata.publication_link.clone())
            .text("private", python_bool(metadata.private))
            .text("accept_license", python_bool(metadata.accept_license))
            .text("part_index", index.to_string())
            .text("part_count", count.to_string());
        for member in &metadata.project_members {
            form = form.text("project_members", member.clone());
        }
        form = form.part("file", Part::reader(file).file_name(file_name));

        let url = format!("{}upload_api/", self.server.base_url());
        let response = self
            .client
            .post(&url)
            .header("X-CSRFToken", token)
            .header("Cookie", format!("csrftoken={token}"))
            .multipart(form)
            .send()
            .map_err(|err| AggregatorError::UploadHttp(err.to_string()))?;
        let status = response.status().as_u16();
        if !response.status().is_success() {
            let message = response
                .text()
                .unwrap_or_else(|_| "upload request failed".to_string());
            return Err(AggregatorError::UploadStatus { status, message });
        }
        Ok(status)
    }
}

impl UploadClient for HttpUploadClient {
    fn upload(&self, bundle: &Path, metadata: &ProjectMetadata) -> Result<UploadReceipt, AggregatorError> {
        let token = self.csrf_token()?;
        let size = std::fs::metadata(bundle)
            .map_err(|err| AggregatorError::Filesystem(err.to_string()))?
            .len();

        let scratch = tempfile::tempdir().map_err(|err| AggregatorError::Filesystem(err.to_string()))?;
        let parts = if size > self.part_bytes {
            split_into_parts(bundle, self.part_bytes, scratch.path())?
        } else {
            vec![bundle.to_path_buf()]
        };

        info!(
            server = ?self.server,
            project = %metadata.project_name,
            parts = parts.len(),
            "uploading bundle"
        );
        let mut status = 0;
        for (index, part) in parts.iter().enumerate() {
            status = self.post_part(&token, part, index, parts.len(), metadata)?;
        }
        Ok(UploadReceipt {
            file: bundle.display().to_string(),
            project_name: metadata.project_name.clone(),
            server: self.server,
            parts: parts.len(),
            status,
            uploaded_at: Utc::now().to_rfc3339(),
        })
    }
}

fn python_bool(value: bool) -> String {
    let text = if value { "True" } else { "False" };
    text.to_string()
}

fn csrf_from_cookie(header: &str) -> Option<String> {
    header
        .split(';')
        .map(str::trim)
        .find_map(|pair| pair.strip_prefix("csrftoken="))
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

/// Splits `source` into `<name>.partNNN` files of at most `part_bytes` each.
pub fn split_into_parts(source: &Path, part_bytes: u64, dest_dir: &Path) -> Result<Vec<PathBuf>, AggregatorError> {
    let name = source
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| AggregatorError::InvalidInput(format!("{} is not a file", source.display())))?;
    let mut reader = File::open(source).map_err(|err| AggregatorError::Filesystem(err.to_string()))?;
    let mut parts = Vec::new();
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let path = dest_dir.join(format!("{name}.part{:03}", parts.len()));
        let mut writer = File::create(&path).map_err(|err| AggregatorError::Filesystem(err.to_string()))?;
        let mut written = 0u64;
        while written < part_bytes {
            let want = buffer.len().min((part_bytes - written) as usize);
            let read = reader
                .read(&mut buffer[..want])
                .map_err(|err| AggregatorError::Filesystem(err.to_string()))?;
            if read == 0 {
                break;
            }
            writer
                .write_all(&buffer[..read])
                .map_err(|err| AggregatorError::Filesystem(err.to_string()))?;
            written += read as u64;
        }
        if written == 0 {
            std::fs::remove_file(&path).map_err(|err| AggregatorError::Filesystem(err.to_string()))?;
            break;
        }
        parts.push(path);
        if written < part_bytes {
            break;
        }
    }
    Ok(parts)
}

/// Checks that `path` is a `.tar.gz` holding `results/run.json`.
pub fn validate_aggregated(path: &Path) -> Result<(), AggregatorError> {
    let display = path.display().to_string();
    if !display.ends_with(".tar.gz") {
        return Err(AggregatorError::NotAggregated(display));
    }
    let members = fs_util::tar_gz_members(path).map_err(|_| AggregatorError::NotAggregated(display.clone()))?;
    if members
        .iter()
        .any(|name| name.trim_start_matches("./") == "results/run.json")
    {
        Ok(())
    } else {
        Err(AggregatorError::NotAggregated(display))
    }
}

/// GenePattern runs jobs in a directory named after the numeric job id.
pub fn describe_origin(cwd: &Path, hostname: &str) -> String {
    let job = cwd
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.parse::<u64>().ok());
    match job {
        Some(job) => format!("Results transferred from GenePattern, job id: {job}"),
        None => format!("Results transferred from CLI, hostname: {hostname}"),
    }
}

pub fn hostname() -> String {
    match ::hostname::get() {
        Ok(name) if !name.is_empty() => name.to_string_lossy().into_owned(),
        _ => "<unknown hostname>".to_string(),
    }
}

/// With several bundles each project name carries the bundle's stem.
pub fn project_name(output_name: &str, bundle: &Path, bundle_count: usize) -> String {
    let base = Path::new(output_name)
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| output_name.to_string());
    if bundle_count > 1 {
        format!("{base}_{}", archive_stem(bundle))
    } else {
        base
    }
}

/// Posts every bundle as its own project. Bundles go up in order and the
/// first failure stops the batch.
pub fn upload_bundles(
    client: &dyn UploadClient,
    bundles: &[PathBuf],
    output_name: &str,
    username: &str,
    description: &str,
) -> Result<Vec<UploadReceipt>, AggregatorError> {
    let mut receipts = Vec::with_capacity(bundles.len());
    for bundle in bundles {
        let metadata = ProjectMetadata::new(project_name(output_name, bundle, bundles.len()), description, username);
        info!(user = %username, project = %metadata.project_name, "creating project");
        receipts.push(client.upload(bundle, &metadata)?);
    }
    Ok(receipts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csrf_cookie_is_parsed() {
        assert_eq!(
            csrf_from_cookie("csrftoken=abc123; expires=Thu, 01 Jan 2099; Path=/"),
            Some("abc123".to_string())
        );
        assert_eq!(csrf_from_cookie("sessionid=x; Path=/"), None);
    }

    #[test]
    fn origin_uses_numeric_job_dir() {
        assert_eq!(
            describe_origin(Path::new("/jobs/12345"), "node1"),
            "Results transferred from GenePattern, job id: 12345"
        );
        assert_eq!(
            describe_origin(Path::new("/home/user/run"), "node1"),
            "Results transferred from CLI, hostname: node1"
        );
    }

    #[test]
    fn hostname_is_never_empty() {
        assert!(!hostname().trim().is_empty());
    }

    #[test]
    fn project_name_per_bundle() {
        assert_eq!(project_name("out/batch", Path::new("a/x.tar.gz"), 1), "batch");
        assert_eq!(project_name("batch", Path::new("a/x.tar.gz"), 2), "batch_x");
    }

    #[test]
    fn split_covers_whole_file() {
        let temp = tempfile::tempdir().unwrap();
        let source = temp.path().join("bundle.tar.gz");
        std::fs::write(&source, vec![7u8; 25]).unwrap();
        let out = temp.path().join("parts");
        std::fs::create_dir_all(&out).unwrap();

        let parts = split_into_parts(&source, 10, &out).unwrap();
        let sizes = parts
            .iter()
            .map(|part| std::fs::metadata(part).unwrap().len())
            .collect::<Vec<_>>();
        assert_eq!(sizes, vec![10, 10, 5]);
        assert!(parts[2].to_string_lossy().ends_with("bundle.tar.gz.part002"));

        let exact = split_into_parts(&source, 25, &out).unwrap();
        assert_eq!(exact.len(), 1);
    }
}
