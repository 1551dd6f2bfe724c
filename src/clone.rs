use super::{
    git_object::ObjectStore,
    git_protocol::{self, upload_pack_request, Advertisement, PackSummary, PktLine, RefMap},
    layout::write_layout,
    Error, Result, Stage, GIT_DIR,
};
use futures_util::TryStreamExt;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::{Response, StatusCode};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use tokio::io::AsyncRead;
use tokio_util::io::{StreamReader, SyncIoBridge};
use tracing::{debug, info};

/// Clones the repository at `url` into `directory`.
///
/// Runs ref discovery, fetch negotiation, packfile decoding and the ref
/// layout one after another; the first failure is returned tagged with the
/// stage it happened in.
pub async fn clone<P: AsRef<Path>>(url: &str, directory: P) -> Result<()> {
    let mut session = Session::new(url, directory);

    session
        .discover_refs()
        .await
        .map_err(|err| err.at(Stage::DiscoverRefs))?;

    let summary = session
        .fetch_packfile()
        .await
        .map_err(|err| err.at(Stage::FetchPackfile))?;
    info!(objects = summary.num_objects, checksum = %summary.checksum, "packfile stored");

    write_layout(&session.directory, &session.head_symref, &session.refs)
        .map_err(|err| err.at(Stage::WriteLayout))?;

    info!(url = %session.repo_url, directory = %session.directory.display(), "clone complete");
    Ok(())
}

#[derive(Debug)]
struct Session {
    repo_url: String,
    directory: PathBuf,
    refs: RefMap,
    head_id: String,
    head_symref: String,
    http: reqwest::Client,
}

impl Session {
    fn new<P: AsRef<Path>>(url: &str, directory: P) -> Self {
        Self {
            repo_url: url.trim_end_matches('/').to_string(),
            directory: directory.as_ref().into(),
            refs: RefMap::new(),
            head_id: String::new(),
            head_symref: String::new(),
            http: reqwest::Client::new(),
        }
    }

    async fn discover_refs(&mut self) -> Result<()> {
        let Advertisement {
            head_id,
            head_symref,
            refs,
        } = discover(&self.http, &self.repo_url).await?;
        info!(head = %head_id, branch = %head_symref, refs = refs.len(), "discovered refs");

        self.head_id = head_id;
        self.head_symref = head_symref;
        self.refs = refs;
        Ok(())
    }

    async fn fetch_packfile(&self) -> Result<PackSummary> {
        let pack = fetch(&self.http, &self.repo_url, &self.head_id).await?;
        let store = ObjectStore::new(self.directory.join(GIT_DIR));

        // The decoder reads synchronously, so it gets its own blocking thread
        // and pulls the response body through a bridge as it goes.
        let reader = BufReader::new(SyncIoBridge::new(pack));
        tokio::task::spawn_blocking(move || git_protocol::decode(reader, &store))
            .await
            .map_err(|err| Error::Other(anyhow::Error::new(err).context("packfile decoder panicked")))?
    }
}

/// Fetches and parses the ref advertisement of `repo_url`.
pub async fn discover(http: &reqwest::Client, repo_url: &str) -> Result<Advertisement> {
    let url = format!("{repo_url}/info/refs?service=git-upload-pack");
    debug!(url = %url, "requesting ref advertisement");

    let res = ensure_ok(http.get(&url).send().await?, &url)?;
    let body = res.bytes().await?;
    Advertisement::parse(&body[..])
}

/// Asks for `head_id` and returns the response body positioned at the packfile.
pub async fn fetch(
    http: &reqwest::Client,
    repo_url: &str,
    head_id: &str,
) -> Result<impl AsyncRead + Send + Unpin + 'static> {
    let url = format!("{repo_url}/git-upload-pack");
    debug!(url = %url, want = head_id, "requesting packfile");

    let res = http
        .post(&url)
        .header(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-git-upload-pack-request"),
        )
        .body(upload_pack_request(head_id)?)
        .send()
        .await?;
    let res = ensure_ok(res, &url)?;

    let stream = Box::pin(res.bytes_stream().map_err(io::Error::other));
    let mut reader = StreamReader::new(stream);

    // ACK/NAK line; the packfile follows directly (no side-band).
    let line = PktLine::read_from_async(&mut reader).await?.ok_or_else(|| {
        Error::Protocol("upload-pack response ended before the acknowledgement line".into())
    })?;
    debug!(
        line = %String::from_utf8_lossy(line.payload()).trim_end(),
        "negotiation acknowledged"
    );

    Ok(reader)
}

fn ensure_ok(res: Response, url: &str) -> Result<Response> {
    match res.status() {
        StatusCode::OK => Ok(res),
        status => Err(Error::Status {
            url: url.to_string(),
            status: status.as_u16(),
        }),
    }
}
