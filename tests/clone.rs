use flate2::{write::ZlibEncoder, Compression};
use git_smart_clone::git_object::{hash_object, ObjectKind, ObjectStore};
use git_smart_clone::{clone, Error, Sha1Hash, Stage};
use std::fs;
use std::io::Write;
use tempfile::TempDir;
use wiremock::matchers::{body_bytes, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BRANCH: &str = "refs/heads/master";

fn pkt(line: &str) -> Vec<u8> {
    let mut bytes = format!("{:04x}", line.len() + 4).into_bytes();
    bytes.extend_from_slice(line.as_bytes());
    bytes
}

fn zlib(data: &[u8]) -> Vec<u8> {
    let mut e = ZlibEncoder::new(vec![], Compression::default());
    e.write_all(data).unwrap();
    e.finish().unwrap()
}

fn object_header(type_tag: u8, mut size: usize) -> Vec<u8> {
    let mut byte = (type_tag << 4) | (size as u8 & 0x0f);
    size >>= 4;
    let mut bytes = vec![];
    while size > 0 {
        bytes.push(byte | 0x80);
        byte = size as u8 & 0x7f;
        size >>= 7;
    }
    bytes.push(byte);
    bytes
}

struct Fixture {
    head: Sha1Hash,
    patched_blob: Sha1Hash,
    pack: Vec<u8>,
}

// One commit whose tree holds two blobs, the second stored as a ref-delta
// against the first.
fn fixture() -> Fixture {
    let base = b"hello world\n".to_vec();
    let patched = b"hello world\ngoodbye world\n".to_vec();
    let base_hash = hash_object(ObjectKind::Blob, &base);
    let patched_hash = hash_object(ObjectKind::Blob, &patched);

    let mut tree = vec![];
    for (name, hash) in [("a.txt", base_hash), ("b.txt", patched_hash)] {
        tree.extend_from_slice(format!("100644 {name}\0").as_bytes());
        tree.extend_from_slice(hash.as_bytes());
    }
    let tree_hash = hash_object(ObjectKind::Tree, &tree);

    let commit = format!(
        "tree {tree_hash}\nauthor A U Thor <author@example.com> 1700000000 +0000\ncommitter A U Thor <author@example.com> 1700000000 +0000\n\ninitial\n"
    )
    .into_bytes();
    let head = hash_object(ObjectKind::Commit, &commit);

    // copy the 12 base bytes, then insert the second line
    let mut delta = vec![base.len() as u8, patched.len() as u8, 0b10010000, 12, 14];
    delta.extend_from_slice(b"goodbye world\n");

    let mut body = vec![];
    for (tag, data) in [(1u8, &commit), (2, &tree), (3, &base)] {
        body.extend(object_header(tag, data.len()));
        body.extend(zlib(data));
    }
    body.extend(object_header(7, delta.len()));
    body.extend_from_slice(base_hash.as_bytes());
    body.extend(zlib(&delta));

    let mut pack = b"PACK".to_vec();
    pack.extend(2u32.to_be_bytes());
    pack.extend(4u32.to_be_bytes());
    pack.extend(body);
    let checksum = Sha1Hash::digest(&pack);
    pack.extend_from_slice(checksum.as_bytes());

    Fixture {
        head,
        patched_blob: patched_hash,
        pack,
    }
}

fn advertisement(head: &Sha1Hash, capabilities: &str) -> Vec<u8> {
    [
        pkt("# service=git-upload-pack\n"),
        b"0000".to_vec(),
        pkt(&format!("{head} HEAD\0{capabilities}\n")),
        pkt(&format!("{head} {BRANCH}\n")),
        pkt(&format!("{head} refs/tags/v0.1\n")),
        b"0000".to_vec(),
    ]
    .concat()
}

async fn serve(server: &MockServer, refs: Vec<u8>, upload_pack: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path("/repo.git/info/refs"))
        .and(query_param("service", "git-upload-pack"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(refs))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/repo.git/git-upload-pack"))
        .and(header("content-type", "application/x-git-upload-pack-request"))
        .respond_with(upload_pack)
        .mount(server)
        .await;
}

fn pack_response(pack: &[u8]) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_bytes([b"0008NAK\n".as_slice(), pack].concat())
}

#[tokio::test]
async fn it_clones_a_single_commit_repository() {
    let server = MockServer::start().await;
    let fixture = fixture();
    let refs = advertisement(&fixture.head, &format!("multi_ack symref=HEAD:{BRANCH} agent=git/2.43.0"));

    Mock::given(method("POST"))
        .and(path("/repo.git/git-upload-pack"))
        .and(body_bytes(
            format!("0032want {}\n00000009done\n", fixture.head).into_bytes(),
        ))
        .respond_with(pack_response(&fixture.pack))
        .expect(1)
        .mount(&server)
        .await;
    serve(&server, refs, ResponseTemplate::new(500)).await;

    let dir = TempDir::new().unwrap();
    clone(&format!("{}/repo.git", server.uri()), dir.path())
        .await
        .unwrap();

    let git_dir = dir.path().join(".git");
    assert_eq!(
        fs::read_to_string(git_dir.join("HEAD")).unwrap(),
        format!("ref: {BRANCH}")
    );

    let head = fs::read_to_string(git_dir.join(BRANCH)).unwrap();
    assert_eq!(head, fixture.head.hex());
    assert!(git_dir
        .join("objects")
        .join(&head[..2])
        .join(&head[2..])
        .is_file());
    assert_eq!(
        fs::read_to_string(git_dir.join("refs/tags/v0.1")).unwrap(),
        head
    );

    let store = ObjectStore::new(&git_dir);
    let (content, kind) = store.read(&fixture.patched_blob).unwrap();
    assert_eq!(kind, ObjectKind::Blob);
    assert_eq!(content, b"hello world\ngoodbye world\n");
}

#[tokio::test]
async fn it_fails_discovery_without_symref() {
    let server = MockServer::start().await;
    let fixture = fixture();
    let refs = advertisement(&fixture.head, "multi_ack thin-pack");
    serve(&server, refs, pack_response(&fixture.pack)).await;

    let dir = TempDir::new().unwrap();
    let err = clone(&format!("{}/repo.git", server.uri()), dir.path())
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::DiscoverRefs));
    assert!(err.to_string().starts_with("failed to discover refs"), "{err}");
    assert!(err.to_string().contains("cannot determine HEAD"), "{err}");
}

#[tokio::test]
async fn it_fails_discovery_on_http_error() {
    let server = MockServer::start().await;

    let dir = TempDir::new().unwrap();
    let err = clone(&format!("{}/missing.git", server.uri()), dir.path())
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::DiscoverRefs));
    match err {
        Error::Stage { source, .. } => {
            assert!(matches!(*source, Error::Status { status: 404, .. }))
        }
        other => panic!("unexpected error {other}"),
    }
}

#[tokio::test]
async fn it_fails_fetch_on_upload_pack_error() {
    let server = MockServer::start().await;
    let fixture = fixture();
    let refs = advertisement(&fixture.head, &format!("symref=HEAD:{BRANCH}"));
    serve(&server, refs, ResponseTemplate::new(403)).await;

    let dir = TempDir::new().unwrap();
    let err = clone(&format!("{}/repo.git", server.uri()), dir.path())
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::FetchPackfile));
    assert!(err.to_string().starts_with("failed to fetch packfile"), "{err}");
}

#[tokio::test]
async fn it_writes_nothing_for_a_bad_packfile() {
    let server = MockServer::start().await;
    let fixture = fixture();
    let refs = advertisement(&fixture.head, &format!("symref=HEAD:{BRANCH}"));
    let mut pack = fixture.pack.clone();
    pack[..4].copy_from_slice(b"JUNK");
    serve(&server, refs, pack_response(&pack)).await;

    let dir = TempDir::new().unwrap();
    let err = clone(&format!("{}/repo.git", server.uri()), dir.path())
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::FetchPackfile));
    assert!(!dir.path().join(".git/objects").exists());
    assert!(!dir.path().join(".git/HEAD").exists());
}

#[tokio::test]
async fn it_fails_layout_for_a_ref_outside_the_git_directory() {
    let server = MockServer::start().await;
    let fixture = fixture();
    let head = fixture.head;
    let refs = [
        pkt("# service=git-upload-pack\n"),
        b"0000".to_vec(),
        pkt(&format!("{head} HEAD\0symref=HEAD:{BRANCH}\n")),
        pkt(&format!("{head} {BRANCH}\n")),
        pkt(&format!("{head} ../escape\n")),
        b"0000".to_vec(),
    ]
    .concat();
    serve(&server, refs, pack_response(&fixture.pack)).await;

    let dir = TempDir::new().unwrap();
    let err = clone(&format!("{}/repo.git", server.uri()), dir.path())
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::WriteLayout));
    assert!(
        err.to_string()
            .starts_with("failed to write repository structure"),
        "{err}"
    );
    assert!(
        matches!(&err, Error::Stage { source, .. } if matches!(**source, Error::Layout(_))),
        "{err:?}"
    );
    assert!(!dir.path().join("escape").exists());
}
