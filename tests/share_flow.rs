//! End-to-end share flows against the in-process server

use filepush::crypto::{self, EncryptionKey};
use filepush::retrieve::{retrieve, MemorySink, RetrievalOrchestrator, RetrievalState};
use filepush::share::parse_share_url;
use filepush::transport::{MemoryTransport, Transport};
use filepush::upload::{upload_text, UploadOptions, UploadOrchestrator, UploadSource, UploadState};
use filepush::Error;
use rand::RngCore;

const VIEW: &str = "https://share.example.com/view";

fn random_payload(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut data);
    data
}

#[test]
fn test_hello_world_through_frame() {
    let key = crypto::generate_key();
    let sealed = crypto::encrypt(b"hello world", &key).unwrap();
    let blob = crypto::frame(&sealed.iv, &sealed.ciphertext);

    let (iv, ciphertext) = crypto::unframe(&blob).unwrap();
    let plaintext = crypto::decrypt(ciphertext, &iv, &key).unwrap();
    assert_eq!(plaintext, b"hello world");
}

#[test]
fn test_bad_keys_are_rejected() {
    assert!(matches!(crypto::import_key(""), Err(Error::InvalidKeyFormat)));
    assert!(matches!(crypto::import_key("AAAA"), Err(Error::InvalidKeyFormat)));
    assert!(matches!(
        crypto::import_key(&"A".repeat(64)),
        Err(Error::InvalidKeyFormat)
    ));
}

#[test]
fn test_short_blob_is_malformed() {
    assert!(matches!(
        crypto::unframe(&[1, 2, 3, 4, 5]),
        Err(Error::MalformedBlob { len: 5 })
    ));
}

#[tokio::test]
async fn test_megabyte_round_trip() {
    let server = MemoryTransport::new();
    let payload = random_payload(1024 * 1024);

    let mut flow = UploadOrchestrator::new(&server, VIEW);
    let receipt = flow
        .run(
            UploadSource::Bytes(payload.clone()),
            UploadOptions::new("payload.bin", "application/octet-stream", 60),
        )
        .await
        .unwrap();

    assert_eq!(flow.state(), UploadState::LinkReady);
    assert_eq!(flow.visits(UploadState::KeyGenerated), 1);
    assert_eq!(flow.visits(UploadState::Encrypted), 1);
    assert_eq!(flow.visits(UploadState::LinkReady), 1);

    let file = retrieve(&server, receipt.share_url.as_str(), None)
        .await
        .unwrap();
    assert_eq!(file.bytes, payload);
    assert_eq!(file.file_name, "payload.bin");
}

#[tokio::test]
async fn test_key_never_reaches_server() {
    let server = MemoryTransport::new();
    let receipt = upload_text(&server, VIEW, "meet at noon", UploadOptions::text(30))
        .await
        .unwrap();

    let url = receipt.share_url.to_string();
    let fragment = receipt.share_url.fragment().unwrap().to_string();
    let descriptor = parse_share_url(&url).unwrap();

    let mut flow = RetrievalOrchestrator::new(&server);
    flow.open(&url).await.unwrap();
    let mut sink = MemorySink::default();
    flow.deliver_to(&mut sink).await.unwrap();
    assert_eq!(sink.files[0].bytes, b"meet at noon");

    let requests = server.requests();
    assert_eq!(requests.len(), 3);
    for request in &requests {
        assert!(!request.contains(&descriptor.key), "{:?}", request.path);
        assert!(!request.contains(&fragment));
    }

    // the stored blob is not the plaintext and does not contain the key
    let blob = server.stored_blob(&descriptor.opaque_id).unwrap();
    assert!(!blob.windows(12).any(|w| w == b"meet at noon"));
    let key = EncryptionKey::import(&descriptor.key).unwrap();
    assert!(!blob.windows(32).any(|w| w == key.as_bytes()));
}

#[tokio::test]
async fn test_password_is_an_access_gate_only() {
    let server = MemoryTransport::new();
    let payload = random_payload(4096);

    let mut flow = UploadOrchestrator::new(&server, VIEW);
    let receipt = flow
        .run(
            UploadSource::Bytes(payload.clone()),
            UploadOptions::new("notes.txt", "text/plain", 60).with_password("hunter2"),
        )
        .await
        .unwrap();
    assert!(receipt.descriptor.password_protected);

    // the password is not part of the link
    assert!(!receipt.share_url.as_str().contains("hunter2"));

    let url = receipt.share_url.to_string();
    assert!(matches!(
        retrieve(&server, &url, None).await,
        Err(Error::Unauthorized)
    ));
    assert!(matches!(
        retrieve(&server, &url, Some("hunter3")).await,
        Err(Error::Unauthorized)
    ));

    // correct password with the wrong key still cannot decrypt
    let other = crypto::export_key(&crypto::generate_key()).unwrap();
    let forged = format!("{}/{}#key={}", VIEW, receipt.descriptor.opaque_id, other);
    assert!(matches!(
        retrieve(&server, &forged, Some("hunter2")).await,
        Err(Error::DecryptionFailed)
    ));

    let file = retrieve(&server, &url, Some("hunter2")).await.unwrap();
    assert_eq!(file.bytes, payload);
}

#[tokio::test]
async fn test_owner_token_deletes_share() {
    let server = MemoryTransport::new();
    let receipt = upload_text(&server, VIEW, "short lived", UploadOptions::text(5))
        .await
        .unwrap();
    let url = receipt.share_url.to_string();

    server.delete(&receipt.owner_token).await.unwrap();

    let mut flow = RetrievalOrchestrator::new(&server);
    assert!(matches!(flow.open(&url).await, Err(Error::NotFound)));
    assert_eq!(flow.state(), RetrievalState::Failed);

    assert!(matches!(
        server.delete(&receipt.owner_token).await,
        Err(Error::NotFound)
    ));
}

#[tokio::test]
async fn test_expired_share_is_gone() {
    let server = MemoryTransport::new();
    let receipt = upload_text(&server, VIEW, "tick tock", UploadOptions::text(5))
        .await
        .unwrap();

    server.advance_clock(chrono::Duration::minutes(6));

    let err = retrieve(&server, receipt.share_url.as_str(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Expired));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_two_file_bundle_round_trip() {
    use std::io::Read;

    let server = MemoryTransport::new();
    let dir = tempfile::tempdir().unwrap();
    let photo = random_payload(2048);
    std::fs::write(dir.path().join("photo.png"), &photo).unwrap();
    std::fs::write(dir.path().join("notes.txt"), "see attached").unwrap();

    let receipt = UploadOrchestrator::new(&server, VIEW)
        .run(
            UploadSource::Bundle(vec![
                dir.path().join("photo.png"),
                dir.path().join("notes.txt"),
            ]),
            UploadOptions::bundle(2, 60),
        )
        .await
        .unwrap();

    let file = retrieve(&server, receipt.share_url.as_str(), None)
        .await
        .unwrap();
    assert_eq!(file.file_name, "2_files.zip");
    assert_eq!(file.mime_type, "application/zip");

    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(file.bytes)).unwrap();
    assert_eq!(archive.len(), 2);

    let mut restored = Vec::new();
    archive
        .by_name("photo.png")
        .unwrap()
        .read_to_end(&mut restored)
        .unwrap();
    assert_eq!(restored, photo);

    let mut notes = String::new();
    archive
        .by_name("notes.txt")
        .unwrap()
        .read_to_string(&mut notes)
        .unwrap();
    assert_eq!(notes, "see attached");
}
