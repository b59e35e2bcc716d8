use bytes::Bytes;
use flatstore::{
    errors::StorageError,
    services::storage_service::{ConsistencyIssue, ListObjectsParams, StorageService},
};
use std::{path::Path, time::Duration};
use tokio::io::AsyncReadExt;

async fn open(root: &Path) -> StorageService {
    StorageService::open(root, Duration::from_secs(2))
        .await
        .unwrap()
}

async fn read_object(service: &StorageService, bucket: &str, key: &str) -> Vec<u8> {
    let (_, mut file) = service.get_object_reader(bucket, key).await.unwrap();
    let mut data = Vec::new();
    file.read_to_end(&mut data).await.unwrap();
    data
}

fn scratch_entries(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with('.'))
        .collect()
}

#[tokio::test]
async fn emptiness_tracks_object_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let service = open(dir.path()).await;

    let created = service.create_bucket("photos").await.unwrap();
    assert!(created.is_empty);

    service
        .put_object("photos", "cat.txt", Bytes::from_static(b"meow"))
        .await
        .unwrap();
    let after_put = service.bucket("photos").await.unwrap();
    assert!(!after_put.is_empty);
    assert!(after_put.modified_at >= created.modified_at);

    service.delete_object("photos", "cat.txt").await.unwrap();
    let after_delete = service.bucket("photos").await.unwrap();
    assert!(after_delete.is_empty);
    assert!(after_delete.modified_at >= after_put.modified_at);
    assert_eq!(after_delete.created_at, created.created_at);
}

#[tokio::test]
async fn non_empty_bucket_survives_delete() {
    let dir = tempfile::tempdir().unwrap();
    let service = open(dir.path()).await;
    service.create_bucket("docs").await.unwrap();
    service
        .put_object("docs", "a.txt", Bytes::from_static(b"a"))
        .await
        .unwrap();

    let err = service.delete_bucket("docs").await.unwrap_err();

    assert!(matches!(err, StorageError::BucketNotEmpty(_)));
    let names: Vec<_> = service
        .list_buckets()
        .await
        .unwrap()
        .into_iter()
        .map(|b| b.name)
        .collect();
    assert_eq!(names, vec!["docs"]);
    assert_eq!(read_object(&service, "docs", "a.txt").await, b"a");

    service.delete_object("docs", "a.txt").await.unwrap();
    service.delete_bucket("docs").await.unwrap();
    assert!(service.list_buckets().await.unwrap().is_empty());
    assert!(!dir.path().join("docs").exists());
}

#[tokio::test]
async fn duplicate_bucket_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let service = open(dir.path()).await;
    service.create_bucket("logs").await.unwrap();

    assert!(matches!(
        service.create_bucket("logs").await,
        Err(StorageError::BucketAlreadyExists(_))
    ));
    assert_eq!(service.list_buckets().await.unwrap().len(), 1);
}

#[tokio::test]
async fn payloads_round_trip_at_several_sizes() {
    let dir = tempfile::tempdir().unwrap();
    let service = open(dir.path()).await;
    service.create_bucket("blobs").await.unwrap();

    let large: Vec<u8> = (0..1_000_000u32).map(|i| (i % 251) as u8).collect();
    let cases: Vec<(&str, Vec<u8>)> = vec![
        ("empty", Vec::new()),
        ("one", vec![b'x']),
        ("large", large),
    ];

    for (key, payload) in cases {
        let record = service
            .put_object("blobs", key, Bytes::from(payload.clone()))
            .await
            .unwrap();
        assert_eq!(record.size, payload.len() as u64, "{key}");

        let meta = service.get_object_metadata("blobs", key).await.unwrap();
        assert_eq!(meta.size, payload.len() as u64, "{key}");
        assert_eq!(read_object(&service, "blobs", key).await, payload, "{key}");
    }
    assert!(scratch_entries(&dir.path().join("blobs")).is_empty());
}

#[tokio::test]
async fn overwrite_keeps_a_single_row() {
    let dir = tempfile::tempdir().unwrap();
    let service = open(dir.path()).await;
    service.create_bucket("notes").await.unwrap();

    service
        .put_object("notes", "todo", Bytes::from_static(b"first draft"))
        .await
        .unwrap();
    service
        .put_object("notes", "todo", Bytes::from_static(b"v2"))
        .await
        .unwrap();

    let listing = service
        .list_objects(
            "notes",
            ListObjectsParams {
                max_keys: 1000,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(listing.objects.len(), 1);
    assert_eq!(listing.objects[0].size, 2);
    assert_eq!(read_object(&service, "notes", "todo").await, b"v2");
}

#[tokio::test]
async fn content_type_is_sniffed() {
    let dir = tempfile::tempdir().unwrap();
    let service = open(dir.path()).await;
    service.create_bucket("media").await.unwrap();

    let text = service
        .put_object("media", "readme", Bytes::from_static(b"hello\n"))
        .await
        .unwrap();
    let png = service
        .put_object(
            "media",
            "pixel.png",
            Bytes::from_static(b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR"),
        )
        .await
        .unwrap();

    assert_eq!(text.content_type, "text/plain; charset=utf-8");
    assert_eq!(png.content_type, "image/png");
}

#[tokio::test]
async fn objects_require_an_existing_bucket() {
    let dir = tempfile::tempdir().unwrap();
    let service = open(dir.path()).await;

    assert!(matches!(
        service
            .put_object("ghost", "a", Bytes::from_static(b"x"))
            .await,
        Err(StorageError::BucketNotFound(_))
    ));
    assert!(!dir.path().join("ghost").exists());
}

#[tokio::test]
async fn invalid_names_are_rejected_before_io() {
    let dir = tempfile::tempdir().unwrap();
    let service = open(dir.path()).await;
    service.create_bucket("valid").await.unwrap();

    assert!(matches!(
        service.create_bucket("Invalid").await,
        Err(StorageError::InvalidBucketName { .. })
    ));
    for key in ["UPPER", "objects.csv", "a/b", ".hidden"] {
        assert!(
            matches!(
                service
                    .put_object("valid", key, Bytes::from_static(b"x"))
                    .await,
                Err(StorageError::InvalidObjectKey { .. })
            ),
            "{key}"
        );
    }
    assert!(service.bucket("valid").await.unwrap().is_empty);
}

#[tokio::test]
async fn missing_object_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let service = open(dir.path()).await;
    service.create_bucket("empty").await.unwrap();

    assert!(matches!(
        service.get_object_metadata("empty", "nothing").await,
        Err(StorageError::ObjectNotFound { .. })
    ));
    assert!(matches!(
        service.delete_object("empty", "nothing").await,
        Err(StorageError::ObjectNotFound { .. })
    ));
    assert!(service.bucket("empty").await.unwrap().is_empty);
}

#[tokio::test]
async fn concurrent_creates_yield_one_bucket() {
    let dir = tempfile::tempdir().unwrap();
    let service = open(dir.path()).await;

    let attempts: Vec<_> = (0..16)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move { service.create_bucket("race").await })
        })
        .collect();

    let mut created = 0;
    let mut duplicates = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(_) => created += 1,
            Err(StorageError::BucketAlreadyExists(_)) => duplicates += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(created, 1);
    assert_eq!(duplicates, 15);
    assert_eq!(service.list_buckets().await.unwrap().len(), 1);
}

#[tokio::test]
async fn concurrent_puts_record_every_key() {
    let dir = tempfile::tempdir().unwrap();
    let service = open(dir.path()).await;
    service.create_bucket("busy").await.unwrap();

    let uploads: Vec<_> = (0..20)
        .map(|i| {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .put_object("busy", &format!("key-{i:02}"), Bytes::from(vec![b'a'; i]))
                    .await
            })
        })
        .collect();
    for upload in uploads {
        upload.await.unwrap().unwrap();
    }

    let listing = service
        .list_objects(
            "busy",
            ListObjectsParams {
                max_keys: 1000,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(listing.objects.len(), 20);
    assert!(!service.bucket("busy").await.unwrap().is_empty);
}

#[tokio::test]
async fn stale_empty_flag_is_corrected_on_delete() {
    let dir = tempfile::tempdir().unwrap();
    let service = open(dir.path()).await;
    service.create_bucket("full").await.unwrap();
    service.create_bucket("hollow").await.unwrap();
    service
        .put_object("full", "a", Bytes::from_static(b"x"))
        .await
        .unwrap();

    // Give `hollow` object rows while its bucket row still says empty.
    std::fs::copy(
        dir.path().join("full").join("objects.csv"),
        dir.path().join("hollow").join("objects.csv"),
    )
    .unwrap();
    std::fs::copy(
        dir.path().join("full").join("a"),
        dir.path().join("hollow").join("a"),
    )
    .unwrap();
    assert!(service.bucket("hollow").await.unwrap().is_empty);

    let err = service.delete_bucket("hollow").await.unwrap_err();

    assert!(matches!(err, StorageError::BucketNotEmpty(_)));
    assert!(!service.bucket("hollow").await.unwrap().is_empty);
    assert!(dir.path().join("hollow").join("a").exists());
}

#[tokio::test]
async fn stale_non_empty_flag_does_not_block_delete() {
    let dir = tempfile::tempdir().unwrap();
    let service = open(dir.path()).await;
    service.create_bucket("abc").await.unwrap();
    service
        .put_object("abc", "a", Bytes::from_static(b"x"))
        .await
        .unwrap();

    // Rows and payload gone while the bucket row still says non-empty.
    std::fs::write(dir.path().join("abc").join("objects.csv"), b"").unwrap();
    std::fs::remove_file(dir.path().join("abc").join("a")).unwrap();
    assert!(!service.bucket("abc").await.unwrap().is_empty);

    service.delete_bucket("abc").await.unwrap();

    assert!(service.list_buckets().await.unwrap().is_empty());
    assert!(!dir.path().join("abc").exists());
    assert!(service.check_consistency().await.unwrap().is_consistent());
}

#[tokio::test]
async fn consistency_report_names_each_issue() {
    let dir = tempfile::tempdir().unwrap();
    let service = open(dir.path()).await;
    service.create_bucket("healthy").await.unwrap();
    service.create_bucket("vanished").await.unwrap();
    service.create_bucket("flagged").await.unwrap();
    service
        .put_object("flagged", "a", Bytes::from_static(b"x"))
        .await
        .unwrap();

    assert!(service.check_consistency().await.unwrap().is_consistent());

    std::fs::remove_dir_all(dir.path().join("vanished")).unwrap();
    std::fs::create_dir(dir.path().join("stray")).unwrap();
    std::fs::write(dir.path().join("flagged").join("objects.csv"), b"").unwrap();

    let report = service.check_consistency().await.unwrap();

    assert_eq!(report.buckets_checked, 3);
    assert_eq!(report.issues.len(), 3);
    assert!(report.issues.contains(&ConsistencyIssue::MissingDirectory {
        bucket: "vanished".into()
    }));
    assert!(report.issues.contains(&ConsistencyIssue::UntrackedDirectory {
        name: "stray".into()
    }));
    assert!(report.issues.contains(&ConsistencyIssue::EmptinessMismatch {
        bucket: "flagged".into(),
        flagged_empty: false,
        rows: 0,
    }));
}

#[tokio::test]
async fn consistency_report_covers_payloads_and_scratch_files() {
    let dir = tempfile::tempdir().unwrap();
    let service = open(dir.path()).await;
    service.create_bucket("files").await.unwrap();
    for key in ["gone", "grown", "fine"] {
        service
            .put_object("files", key, Bytes::from_static(b"abc"))
            .await
            .unwrap();
    }
    let bucket_dir = dir.path().join("files");

    std::fs::remove_file(bucket_dir.join("gone")).unwrap();
    std::fs::write(bucket_dir.join("grown"), b"abcdef").unwrap();
    std::fs::write(bucket_dir.join(".backup_0123abcd"), b"old").unwrap();
    // An upload still receiving its body is not an issue.
    std::fs::write(bucket_dir.join(".upload_0123abcd"), b"partial").unwrap();
    // A dot-leading name is still a valid bucket name.
    std::fs::create_dir(dir.path().join(".ab")).unwrap();

    let report = service.check_consistency().await.unwrap();

    assert_eq!(report.issues.len(), 4, "{:?}", report.issues);
    assert!(report.issues.contains(&ConsistencyIssue::MissingBlob {
        bucket: "files".into(),
        key: "gone".into(),
    }));
    assert!(report.issues.contains(&ConsistencyIssue::SizeMismatch {
        bucket: "files".into(),
        key: "grown".into(),
        recorded: 3,
        on_disk: 6,
    }));
    assert!(report.issues.contains(&ConsistencyIssue::LeftoverScratch {
        bucket: "files".into(),
        name: ".backup_0123abcd".into(),
    }));
    assert!(report.issues.contains(&ConsistencyIssue::UntrackedDirectory {
        name: ".ab".into()
    }));
}

#[tokio::test]
async fn state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let service = open(dir.path()).await;
        service.create_bucket("keep").await.unwrap();
        service
            .put_object("keep", "a.txt", Bytes::from_static(b"persisted"))
            .await
            .unwrap();
    }

    let service = open(dir.path()).await;

    let buckets = service.list_buckets().await.unwrap();
    assert_eq!(buckets.len(), 1);
    assert!(!buckets[0].is_empty);
    assert_eq!(read_object(&service, "keep", "a.txt").await, b"persisted");
    assert!(scratch_entries(dir.path()).is_empty());
}

#[tokio::test]
async fn listing_pages_through_keys() {
    let dir = tempfile::tempdir().unwrap();
    let service = open(dir.path()).await;
    service.create_bucket("paged").await.unwrap();
    for key in ["c", "a", "b.log", "b.txt"] {
        service
            .put_object("paged", key, Bytes::from_static(b"x"))
            .await
            .unwrap();
    }

    let first = service
        .list_objects(
            "paged",
            ListObjectsParams {
                max_keys: 2,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(first.is_truncated);

    let rest = service
        .list_objects(
            "paged",
            ListObjectsParams {
                max_keys: 2,
                continuation_token: first.next_continuation_token,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let keys: Vec<_> = first
        .objects
        .iter()
        .chain(&rest.objects)
        .map(|o| o.key.as_str())
        .collect();
    assert_eq!(keys, vec!["a", "b.log", "b.txt", "c"]);
    assert!(!rest.is_truncated);
}
