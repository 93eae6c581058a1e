#[cfg(test)]
mod tests {
    use crate::fs::errors::FsError;
    use crate::fs::flake::Flake;
    use crate::fs::key_codec::ChunkId;
    use crate::fs::store::ChunkStore;
    use crate::fs::types::{Attr, SetAttrValid, S_IFDIR};
    use crate::fs::{DirService, ROOT_INODE};
    use crate::kv::{Kv, MemoryKv};
    use crate::mount::request::{VfsOp, VfsReply, VfsRequest};
    use crate::mount::{ReplySink, RequestStream, Session};
    use crate::rpc::server::{serve_listener, ApiConfig, ApiServer};
    use crate::rpc::VolumeClient;
    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::Arc;
    use std::time::Instant;
    use tokio_util::sync::CancellationToken;

    const KIB: u64 = 1024;

    async fn harness(block_size: u64) -> (Arc<ApiServer>, ChunkStore) {
        let kv: Arc<dyn Kv> = Arc::new(MemoryKv::new());
        let dir = Arc::new(DirService::new(kv.clone()).await.unwrap());
        let chunks = ChunkStore::new(kv);
        let api = Arc::new(ApiServer::new(
            dir,
            chunks.clone(),
            Arc::new(Flake::new(1, 0)),
            ApiConfig {
                block_size,
                customer_id: 1,
                share_id: 1,
            },
        ));
        (api, chunks)
    }

    async fn create_file(api: &ApiServer, parent: u64, name: &str) -> Attr {
        let (_, attr) = api.create(parent, name, 0o644, 1000, 1000).await.unwrap();
        attr
    }

    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn aligned_write_then_read() {
        let (api, chunks) = harness(64 * KIB).await;
        let file = create_file(&api, ROOT_INODE, "big.bin").await;

        let payload = patterned(128 * KIB as usize);
        api.write(file.inode, 0, &payload).await.unwrap();

        // Exactly two chunks, one per 64 KiB block.
        let k0 = ChunkId::derive(1, 1, file.inode, 0);
        let k1 = ChunkId::derive(1, 1, file.inode, 1);
        let k2 = ChunkId::derive(1, 1, file.inode, 2);
        assert_eq!(chunks.get(&k0).await.unwrap().unwrap().len(), 64 * 1024);
        assert_eq!(chunks.get(&k1).await.unwrap().unwrap().len(), 64 * 1024);
        assert!(chunks.get(&k2).await.unwrap().is_none());

        let read = api.read(file.inode, 0, 128 * KIB).await.unwrap();
        assert_eq!(read.as_ref(), &payload[..]);

        let attr = api.dir().getattr(file.inode).await.unwrap();
        assert_eq!(attr.size, 131072);
    }

    #[tokio::test]
    async fn unaligned_small_write() {
        let (api, chunks) = harness(64 * KIB).await;
        let file = create_file(&api, ROOT_INODE, "small.txt").await;

        api.write(file.inode, 10, b"hello").await.unwrap();

        let k0 = ChunkId::derive(1, 1, file.inode, 0);
        let chunk = chunks.get(&k0).await.unwrap().unwrap();
        assert_eq!(chunk.len(), 15);
        assert_eq!(&chunk[..10], &[0u8; 10]);
        assert_eq!(&chunk[10..], b"hello");

        let read = api.read(file.inode, 0, 15).await.unwrap();
        assert_eq!(&read[..10], &[0u8; 10]);
        assert_eq!(&read[10..], b"hello");

        assert_eq!(api.dir().getattr(file.inode).await.unwrap().size, 15);
    }

    #[tokio::test]
    async fn unaligned_spanning_write() {
        let (api, chunks) = harness(16).await;
        let file = create_file(&api, ROOT_INODE, "span.bin").await;

        api.write(file.inode, 10, b"0123456789ABCDEFGHIJ")
            .await
            .unwrap();

        let k0 = ChunkId::derive(1, 1, file.inode, 0);
        let chunk0 = chunks.get(&k0).await.unwrap().unwrap();
        assert_eq!(&chunk0[..10], &[0u8; 10]);
        assert_eq!(&chunk0[10..], b"012345");

        let k1 = ChunkId::derive(1, 1, file.inode, 1);
        let chunk1 = chunks.get(&k1).await.unwrap().unwrap();
        assert_eq!(chunk1.as_ref(), b"6789ABCDEFGHIJ");

        assert_eq!(api.dir().getattr(file.inode).await.unwrap().size, 30);

        let read = api.read(file.inode, 0, 30).await.unwrap();
        assert_eq!(&read[..10], &[0u8; 10]);
        assert_eq!(&read[10..], b"0123456789ABCDEFGHIJ");
    }

    #[tokio::test]
    async fn sparse_read_returns_empty_payload() {
        let (api, _) = harness(64 * KIB).await;
        let file = create_file(&api, ROOT_INODE, "empty.bin").await;

        let read = api.read(file.inode, 0, 1024).await.unwrap();
        assert!(read.is_empty());
    }

    #[tokio::test]
    async fn read_modify_write_merges_over_existing() {
        let (api, _) = harness(16).await;
        let file = create_file(&api, ROOT_INODE, "merge.bin").await;

        api.write(file.inode, 0, b"AAAAAAAAAAAAAAAA").await.unwrap();
        api.write(file.inode, 4, b"bb").await.unwrap();

        let read = api.read(file.inode, 0, 16).await.unwrap();
        assert_eq!(read.as_ref(), b"AAAAbbAAAAAAAAAA");
        assert_eq!(api.dir().getattr(file.inode).await.unwrap().size, 16);
    }

    #[tokio::test]
    async fn write_then_read_offset_window() {
        let (api, _) = harness(16).await;
        let file = create_file(&api, ROOT_INODE, "window.bin").await;

        let payload = patterned(64);
        api.write(file.inode, 0, &payload).await.unwrap();

        // A read window straddling block boundaries returns exactly the
        // requested slice.
        let read = api.read(file.inode, 13, 21).await.unwrap();
        assert_eq!(read.as_ref(), &payload[13..34]);
    }

    #[tokio::test]
    async fn truncated_range_reads_as_absent() {
        let (api, _) = harness(16).await;
        let file = create_file(&api, ROOT_INODE, "trunc.bin").await;

        api.write(file.inode, 0, &patterned(48)).await.unwrap();
        let attr = Attr {
            size: 20,
            ..api.dir().getattr(file.inode).await.unwrap()
        };
        api.dir()
            .setattr(file.inode, &attr, SetAttrValid::new(SetAttrValid::SIZE))
            .await
            .unwrap();

        assert_eq!(api.dir().getattr(file.inode).await.unwrap().size, 20);
        let read = api.read(file.inode, 0, 48).await.unwrap();
        assert_eq!(read.len(), 20);
        assert!(api.read(file.inode, 20, 16).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn directory_semantics() {
        let (api, _) = harness(64 * KIB).await;

        let (_, dir_a) = api
            .mkdir(ROOT_INODE, "a", 0o755, 1000, 1000)
            .await
            .unwrap();
        assert_eq!(dir_a.mode & S_IFDIR, S_IFDIR);

        let file = create_file(&api, dir_a.inode, "f").await;

        let entries = api.dir().readdir_all(dir_a.inode).await.unwrap();
        let named: Vec<_> = entries.iter().filter(|e| e.name == "f").collect();
        assert_eq!(named.len(), 1);
        assert_eq!(named[0].attr.inode, file.inode);

        assert_eq!(
            api.dir().remove(ROOT_INODE, "a").await.unwrap_err(),
            FsError::NotEmpty
        );

        api.dir().remove(dir_a.inode, "f").await.unwrap();
        api.dir().remove(ROOT_INODE, "a").await.unwrap();
        assert_eq!(
            api.dir().lookup(ROOT_INODE, "a").await.unwrap_err(),
            FsError::NotFound
        );
    }

    #[tokio::test]
    async fn create_then_lookup_same_inode() {
        let (api, _) = harness(64 * KIB).await;
        let file = create_file(&api, ROOT_INODE, "f.txt").await;

        let (_, found) = api.dir().lookup(ROOT_INODE, "f.txt").await.unwrap();
        assert_eq!(found.inode, file.inode);

        assert_eq!(
            api.create(ROOT_INODE, "f.txt", 0o644, 0, 0)
                .await
                .unwrap_err(),
            FsError::Exists
        );
    }

    #[tokio::test]
    async fn rename_overwrite() {
        let (api, _) = harness(64 * KIB).await;
        let x = create_file(&api, ROOT_INODE, "x").await;
        let _y = create_file(&api, ROOT_INODE, "y").await;

        api.dir().rename(ROOT_INODE, "x", ROOT_INODE, "y").await.unwrap();

        let (_, found) = api.dir().lookup(ROOT_INODE, "y").await.unwrap();
        assert_eq!(found.inode, x.inode);
        assert_eq!(
            api.dir().lookup(ROOT_INODE, "x").await.unwrap_err(),
            FsError::NotFound
        );
    }

    #[tokio::test]
    async fn rename_type_mismatch() {
        let (api, _) = harness(64 * KIB).await;
        create_file(&api, ROOT_INODE, "file").await;
        api.mkdir(ROOT_INODE, "dir", 0o755, 0, 0).await.unwrap();

        assert_eq!(
            api.dir()
                .rename(ROOT_INODE, "file", ROOT_INODE, "dir")
                .await
                .unwrap_err(),
            FsError::IsDirectory
        );
        assert_eq!(
            api.dir()
                .rename(ROOT_INODE, "dir", ROOT_INODE, "file")
                .await
                .unwrap_err(),
            FsError::NotDirectory
        );
    }

    #[tokio::test]
    async fn rename_across_directories() {
        let (api, _) = harness(64 * KIB).await;
        let (_, src) = api.mkdir(ROOT_INODE, "src", 0o755, 0, 0).await.unwrap();
        let (_, dst) = api.mkdir(ROOT_INODE, "dst", 0o755, 0, 0).await.unwrap();
        let file = create_file(&api, src.inode, "f").await;

        api.dir()
            .rename(src.inode, "f", dst.inode, "moved")
            .await
            .unwrap();

        assert!(api.dir().readdir_all(src.inode).await.unwrap().is_empty());
        let (_, found) = api.dir().lookup(dst.inode, "moved").await.unwrap();
        assert_eq!(found.inode, file.inode);

        // src is now removable, dst is not.
        api.dir().remove(ROOT_INODE, "src").await.unwrap();
        assert_eq!(
            api.dir().remove(ROOT_INODE, "dst").await.unwrap_err(),
            FsError::NotEmpty
        );
    }

    #[tokio::test]
    async fn symlink_roundtrip() {
        let (api, _) = harness(64 * KIB).await;

        let (_, link) = api
            .symlink(ROOT_INODE, "link", "/somewhere/else", 1000, 1000)
            .await
            .unwrap();
        assert_eq!(link.size, "/somewhere/else".len() as u64);

        let target = api.dir().readlink(link.inode).await.unwrap();
        assert_eq!(target, "/somewhere/else");

        let file = create_file(&api, ROOT_INODE, "plain").await;
        assert_eq!(
            api.dir().readlink(file.inode).await.unwrap_err(),
            FsError::NotSymlink
        );
    }

    #[tokio::test]
    async fn xattr_roundtrip() {
        let (api, _) = harness(64 * KIB).await;
        let file = create_file(&api, ROOT_INODE, "tagged").await;

        api.dir()
            .setxattr(file.inode, "user.color", Bytes::from_static(b"blue"))
            .await
            .unwrap();
        assert_eq!(
            api.dir()
                .getxattr(file.inode, "user.color")
                .await
                .unwrap()
                .as_ref(),
            b"blue"
        );
        assert_eq!(
            api.dir().listxattr(file.inode).await.unwrap(),
            vec!["user.color"]
        );

        api.dir()
            .removexattr(file.inode, "user.color")
            .await
            .unwrap();
        assert_eq!(
            api.dir()
                .getxattr(file.inode, "user.color")
                .await
                .unwrap_err(),
            FsError::XattrNotFound
        );
    }

    #[tokio::test]
    async fn setattr_mask_preserves_unset_fields() {
        let (api, _) = harness(64 * KIB).await;
        let file = create_file(&api, ROOT_INODE, "masked").await;

        let change = Attr {
            mode: 0o600,
            uid: 4242,
            ..file
        };
        let updated = api
            .dir()
            .setattr(file.inode, &change, SetAttrValid::new(SetAttrValid::MODE))
            .await
            .unwrap();
        assert_eq!(updated.mode & 0o777, 0o600);
        assert_eq!(updated.uid, file.uid, "uid outside the mask must survive");
        assert_eq!(updated.size, file.size);
    }

    // --- dispatcher over a live loopback server ---

    struct ScriptedStream {
        requests: VecDeque<VfsRequest>,
    }

    #[async_trait]
    impl RequestStream for ScriptedStream {
        async fn next_request(&mut self) -> io::Result<Option<VfsRequest>> {
            Ok(self.requests.pop_front())
        }
    }

    #[derive(Default)]
    struct CollectingSink {
        replies: Mutex<Vec<VfsReply>>,
    }

    #[async_trait]
    impl ReplySink for CollectingSink {
        async fn send_reply(&self, reply: VfsReply) -> io::Result<()> {
            self.replies.lock().push(reply);
            Ok(())
        }
    }

    async fn spawn_server(api: Arc<ApiServer>) -> (std::net::SocketAddr, CancellationToken) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let token = CancellationToken::new();
        let serve_token = token.clone();
        tokio::spawn(async move {
            serve_listener(listener, api, Vec::new(), serve_token)
                .await
                .unwrap();
        });
        (addr, token)
    }

    #[tokio::test]
    async fn dispatcher_serves_and_drains() {
        let (api, _) = harness(64 * KIB).await;
        let (addr, token) = spawn_server(api).await;

        let client = VolumeClient::connect_tcp(addr).await.unwrap();
        let (_, file) = client
            .create(ROOT_INODE, "doc.txt".into(), 0o644, 1000, 1000)
            .await
            .unwrap();

        let requests = VecDeque::from(vec![
            VfsRequest {
                unique: 1,
                deadline: None,
                op: VfsOp::Write {
                    inode: file.inode,
                    offset: 0,
                    data: b"the quick brown fox".to_vec(),
                },
            },
            VfsRequest {
                unique: 2,
                deadline: None,
                op: VfsOp::Lookup {
                    parent: ROOT_INODE,
                    name: "missing".into(),
                },
            },
            VfsRequest {
                unique: 3,
                deadline: None,
                op: VfsOp::StatFs,
            },
        ]);

        let sink = Arc::new(CollectingSink::default());
        let session = Session::new(
            ScriptedStream { requests },
            sink.clone(),
            client.clone(),
        );
        session.serve().await.unwrap();

        let replies = sink.replies.lock().clone();
        assert_eq!(replies.len(), 3, "exactly one reply per request");

        let by_unique = |u: u64| replies.iter().find(|r| r.unique() == u).unwrap().clone();
        assert_eq!(
            by_unique(1),
            VfsReply::Written {
                unique: 1,
                count: 19
            }
        );
        assert_eq!(
            by_unique(2),
            VfsReply::Error {
                unique: 2,
                errno: libc::ENOENT
            }
        );
        match by_unique(3) {
            VfsReply::Statfs { info, .. } => assert_eq!(info.bsize, 4096),
            other => panic!("unexpected reply {other:?}"),
        }

        // The write went through the wire and the block engine.
        let read = client.read(file.inode, 4, 5).await.unwrap();
        assert_eq!(read, b"quick");

        token.cancel();
    }

    #[tokio::test]
    async fn expired_deadline_maps_to_timeout() {
        let (api, _) = harness(64 * KIB).await;
        let (addr, token) = spawn_server(api).await;
        let client = VolumeClient::connect_tcp(addr).await.unwrap();

        let requests = VecDeque::from(vec![VfsRequest {
            unique: 7,
            // Already lapsed by the time the worker issues the RPC.
            deadline: Some(Instant::now()),
            op: VfsOp::GetAttr { inode: ROOT_INODE },
        }]);

        let sink = Arc::new(CollectingSink::default());
        let session = Session::new(ScriptedStream { requests }, sink.clone(), client);
        session.serve().await.unwrap();

        let replies = sink.replies.lock().clone();
        assert_eq!(
            replies,
            vec![VfsReply::Error {
                unique: 7,
                errno: libc::ETIMEDOUT
            }]
        );
        token.cancel();
    }

    #[tokio::test]
    async fn cancelled_session_replies_eintr() {
        let (api, _) = harness(64 * KIB).await;
        let (addr, token) = spawn_server(api).await;
        let client = VolumeClient::connect_tcp(addr).await.unwrap();

        let requests = VecDeque::from(vec![VfsRequest {
            unique: 8,
            deadline: None,
            op: VfsOp::GetAttr { inode: ROOT_INODE },
        }]);

        let sink = Arc::new(CollectingSink::default());
        let session = Session::new(ScriptedStream { requests }, sink.clone(), client);
        session.cancellation_token().cancel();
        session.serve().await.unwrap();

        let replies = sink.replies.lock().clone();
        assert_eq!(
            replies,
            vec![VfsReply::Error {
                unique: 8,
                errno: libc::EINTR
            }]
        );
        token.cancel();
    }

    #[tokio::test]
    async fn ungranted_address_is_rejected() {
        let (api, _) = harness(64 * KIB).await;
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let token = CancellationToken::new();
        let serve_token = token.clone();
        tokio::spawn(async move {
            serve_listener(
                listener,
                api,
                vec!["10.0.0.1".parse().unwrap()],
                serve_token,
            )
            .await
            .unwrap();
        });

        let client = VolumeClient::connect_tcp(addr).await.unwrap();
        assert!(client.statfs().await.is_err());
        token.cancel();
    }
}
