//! End-to-end tests: a mount table over emoji filesystems.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use emojifs_vfs::api::transport::mock::MockTransport;
use emojifs_vfs::api::{ApiResponse, Method};
use emojifs_vfs::{
    ContentFetcher, EmojiFs, ImageFormat, MemoryService, MountTable, SlackService, VfsError,
    VfsOps,
};
use serde_json::json;

fn content() -> Arc<ContentFetcher> {
    Arc::new(ContentFetcher::new(Arc::new(MockTransport::new())))
}

fn names(entries: Vec<emojifs_vfs::DirEntry>) -> Vec<String> {
    let mut names: Vec<_> = entries.into_iter().map(|e| e.name).collect();
    names.sort();
    names
}

struct Fixture {
    table: MountTable,
    scratch: Arc<EmojiFs<MemoryService>>,
    guilds: Arc<EmojiFs<MemoryService>>,
}

fn fixture() -> Fixture {
    let content = content();

    let scratch = Arc::new(EmojiFs::new(MemoryService::flat("scratch"), content.clone()));
    scratch
        .service()
        .insert("scratch", "parrot", ImageFormat::Gif, b"GIF89a-parrot");

    let guilds = MemoryService::grouped("discord");
    guilds.add_collection("100", "rust/gamedev", true);
    guilds.add_collection("200", "readonly", false);
    guilds.insert("100", "ferris", ImageFormat::Png, b"PNG-ferris");
    let guilds = Arc::new(EmojiFs::new(guilds, content.clone()));

    let acme = EmojiFs::new(MemoryService::flat("acme"), content.clone());
    let beta = EmojiFs::new(MemoryService::flat("beta"), content);

    let table = MountTable::builder()
        .mount_arc("/scratch", scratch.clone())
        .mount_arc("/discord", guilds.clone())
        .mount("/slack/acme", acme)
        .mount("/slack/beta", beta)
        .build()
        .unwrap();

    Fixture {
        table,
        scratch,
        guilds,
    }
}

fn p(s: &str) -> &Path {
    Path::new(s)
}

#[tokio::test]
async fn test_root_and_intermediate_listing() {
    let f = fixture();
    assert_eq!(
        names(f.table.readdir(p("/")).await.unwrap()),
        vec!["discord", "scratch", "slack"]
    );
    assert_eq!(
        names(f.table.readdir(p("/slack")).await.unwrap()),
        vec!["acme", "beta"]
    );
    let slack = f.table.getattr(p("/slack")).await.unwrap();
    assert!(slack.is_dir());
    assert_eq!(slack.perm, 0o555);
}

#[tokio::test]
async fn test_write_round_trip() {
    let f = fixture();
    let payload: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();

    f.table.create(p("/scratch/wave.png"), 0o644).await.unwrap();
    let mut offset = 0u64;
    for chunk in payload.chunks(4096) {
        let n = f
            .table
            .write(p("/scratch/wave.png"), offset, chunk)
            .await
            .unwrap();
        offset += u64::from(n);
    }

    // Served from the buffer; no listing needed.
    let before = f.scratch.service().entity_listings();
    let staged = f
        .table
        .read(p("/scratch/wave.png"), 0, payload.len() as u32)
        .await
        .unwrap();
    assert_eq!(staged, payload);
    assert_eq!(f.scratch.service().entity_listings(), before);
    assert_eq!(f.scratch.service().uploads(), 0);

    f.table.release(p("/scratch/wave.png")).await.unwrap();
    assert_eq!(f.scratch.service().uploads(), 1);
    assert_eq!(
        &f.scratch.service().content("scratch", "wave").unwrap()[..],
        &payload[..]
    );
    assert_eq!(
        f.table.read_all(p("/scratch/wave.png")).await.unwrap(),
        payload
    );
}

#[tokio::test]
async fn test_mutations_invalidate_listing() {
    let f = fixture();
    assert_eq!(
        names(f.table.readdir(p("/scratch")).await.unwrap()),
        vec!["parrot.gif"]
    );

    f.table
        .write_all(p("/scratch/new.gif"), b"GIF89a-new")
        .await
        .unwrap();
    assert_eq!(
        names(f.table.readdir(p("/scratch")).await.unwrap()),
        vec!["new.gif", "parrot.gif"]
    );

    f.table.unlink(p("/scratch/parrot.gif")).await.unwrap();
    assert_eq!(
        names(f.table.readdir(p("/scratch")).await.unwrap()),
        vec!["new.gif"]
    );
}

#[tokio::test]
async fn test_failed_upload_releases_buffer() {
    let f = fixture();
    f.scratch.service().fail_uploads(true);

    f.table.create(p("/scratch/doomed.png"), 0o644).await.unwrap();
    f.table
        .write(p("/scratch/doomed.png"), 0, b"bytes")
        .await
        .unwrap();
    let err = f.table.release(p("/scratch/doomed.png")).await.unwrap_err();
    assert!(matches!(err, VfsError::Upstream { status: 500, .. }));
    assert_eq!(err.errno(), libc::EIO);

    // The buffer is gone and nothing was created.
    assert!(matches!(
        f.table.getattr(p("/scratch/doomed.png")).await,
        Err(VfsError::NotFound(_))
    ));
    assert!(f.table.read(p("/scratch/doomed.png"), 0, 10).await.is_err());

    // Once uploads work again the same name can be created.
    f.scratch.service().fail_uploads(false);
    f.table
        .write_all(p("/scratch/doomed.png"), b"second")
        .await
        .unwrap();
    assert_eq!(
        &f.scratch.service().content("scratch", "doomed").unwrap()[..],
        b"second"
    );
}

#[tokio::test]
async fn test_failed_mutations_invalidate_listing() {
    let f = fixture();
    let svc = f.scratch.service();
    let listings = || svc.entity_listings();

    // Warm the listing cache; a second readdir is served from it.
    f.table.readdir(p("/scratch")).await.unwrap();
    f.table.readdir(p("/scratch")).await.unwrap();
    let warm = listings();

    svc.fail_uploads(true);
    f.table.create(p("/scratch/doomed.png"), 0o644).await.unwrap();
    f.table
        .write(p("/scratch/doomed.png"), 0, b"bytes")
        .await
        .unwrap();
    assert!(f.table.release(p("/scratch/doomed.png")).await.is_err());
    f.table.readdir(p("/scratch")).await.unwrap();
    assert_eq!(listings(), warm + 1);

    svc.fail_deletes(true);
    assert!(f.table.unlink(p("/scratch/parrot.gif")).await.is_err());
    assert_eq!(
        names(f.table.readdir(p("/scratch")).await.unwrap()),
        vec!["parrot.gif"]
    );
    assert_eq!(listings(), warm + 2);

    svc.fail_aliases(true);
    assert!(f
        .table
        .symlink(p("/scratch/party.gif"), p("parrot.gif"))
        .await
        .is_err());
    assert_eq!(
        names(f.table.readdir(p("/scratch")).await.unwrap()),
        vec!["parrot.gif"]
    );
    assert_eq!(listings(), warm + 3);

    // With nothing changed, listings come from the cache again.
    f.table.readdir(p("/scratch")).await.unwrap();
    assert_eq!(listings(), warm + 3);
}

#[tokio::test]
async fn test_grouped_backend_through_router() {
    let f = fixture();
    assert_eq!(
        names(f.table.readdir(p("/discord")).await.unwrap()),
        vec!["readonly", "rust_gamedev"]
    );
    assert_eq!(
        names(f.table.readdir(p("/discord/rust_gamedev")).await.unwrap()),
        vec!["ferris.png"]
    );
    assert_eq!(
        f.table
            .read(p("/discord/rust_gamedev/ferris.png"), 4, 100)
            .await
            .unwrap(),
        b"ferris"
    );

    assert!(matches!(
        f.table.unlink(p("/discord/rust_gamedev")).await,
        Err(VfsError::PermissionDenied(_))
    ));
    assert!(matches!(
        f.table.create(p("/discord/readonly/x.png"), 0o644).await,
        Err(VfsError::PermissionDenied(_))
    ));
    assert!(matches!(
        f.table.create(p("/discord/rust_gamedev/x.webp"), 0o644).await,
        Err(VfsError::InvalidArgument(_))
    ));
    assert_eq!(f.guilds.service().uploads(), 0);
}

#[tokio::test]
async fn test_alias_and_xattrs_through_router() {
    let f = fixture();
    f.table
        .symlink(p("/scratch/party.gif"), p("parrot.gif"))
        .await
        .unwrap();

    assert!(f.table.getattr(p("/scratch/party.gif")).await.unwrap().is_symlink());
    assert_eq!(
        f.table.readlink(p("/scratch/party.gif")).await.unwrap(),
        PathBuf::from("parrot.gif")
    );

    let creator = f
        .table
        .getxattr(p("/scratch/parrot.gif"), "user.created_by")
        .await
        .unwrap();
    assert_eq!(creator, b"scratch");
    assert!(matches!(
        f.table.getxattr(p("/scratch/parrot.gif"), "user.nope").await,
        Err(VfsError::NoSuchAttribute(_))
    ));
    assert!(matches!(
        f.table.getxattr(p("/slack"), "user.url").await,
        Err(VfsError::NoSuchAttribute(_))
    ));
}

#[tokio::test]
async fn test_unmounted_path() {
    let f = fixture();
    let err = f.table.getattr(p("/telegram")).await.unwrap_err();
    assert!(matches!(err, VfsError::NoMountPoint(_) | VfsError::NotFound(_)));
    assert!(f.table.getattr(p("/slack/gamma")).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_listing_still_succeeds() {
    let mock = Arc::new(MockTransport::new());
    mock.on(
        Method::Get,
        "/auth.test",
        ApiResponse::json_ok(json!({
            "ok": true,
            "url": "https://acme.slack.com/",
            "team": "Acme",
            "team_id": "T1",
            "user_id": "U1",
        })),
    )
    .on(
        Method::Get,
        "/users.info",
        ApiResponse::json_ok(json!({"ok": true, "user": {"name": "alice"}})),
    )
    .on(
        Method::Get,
        "/emoji.adminList",
        ApiResponse::new(429, "").with_header("Retry-After", "5"),
    )
    .on(
        Method::Get,
        "/emoji.adminList",
        ApiResponse::json_ok(json!({
            "ok": true,
            "emoji": [{"name": "wave", "url": "https://e.test/wave.png", "is_alias": 0}],
            "paging": {"pages": 1},
        })),
    );

    let slack = SlackService::connect(mock.clone(), "xoxp-test").await.unwrap();
    let table = MountTable::builder()
        .mount(
            format!("/slack/{}", slack.workspace()),
            EmojiFs::new(slack, Arc::new(ContentFetcher::new(mock.clone()))),
        )
        .build()
        .unwrap();

    let start = tokio::time::Instant::now();
    let listing = names(table.readdir(p("/slack/acme")).await.unwrap());
    assert_eq!(listing, vec!["wave.png"]);
    assert_eq!(mock.count(Method::Get, "/emoji.adminList"), 2);
    assert!(start.elapsed() >= Duration::from_secs(5));
}
