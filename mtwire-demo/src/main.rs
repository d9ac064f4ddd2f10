//! mtwire-demo: the client core wired end to end, no network needed.
//!
//! # What this does
//!
//! 1. Start [`Services`]: dispatcher, crypto worker thread, reference database
//! 2. Run a few crypto operations through the worker (SHA-256, PQ factorization, AES-IGE)
//! 3. Frame a payload with padded intermediate over an in-memory pipe and read it back
//! 4. Register a file reference, let it "expire", and refresh it through an
//!    in-memory refetcher
//!
//! # Run
//! ```text
//! cargo run -p mtwire-demo
//! ```

use std::collections::HashMap;
use std::sync::Mutex;

use mtwire_client::{
    Config, ReferenceBytes, ReferenceContext, ReferenceUpdates, RefetchError, Refetcher, Services,
};
use mtwire_mtproto::PaddedIntermediate;
use tokio::io::AsyncReadExt;

// ── In-memory "server" ────────────────────────────────────────────────────────

/// Pretends to be the messages API: every refetch of a message hands out the
/// next reference from a rotating counter.
#[derive(Default)]
struct MemoryServer {
    current: Mutex<HashMap<(i64, i32), ReferenceBytes>>,
    rotation: Mutex<u8>,
}

impl MemoryServer {
    fn publish(&self, peer_id: i64, message_id: i32, reference: ReferenceBytes) {
        self.current.lock().unwrap().insert((peer_id, message_id), reference);
    }
}

impl Refetcher for MemoryServer {
    async fn refetch_message(&self, peer_id: i64, message_id: i32) -> Result<ReferenceUpdates, RefetchError> {
        let mut current = self.current.lock().unwrap();
        let Some(old) = current.get(&(peer_id, message_id)).cloned() else {
            return Err(RefetchError::Failed(format!("MESSAGE_ID_INVALID ({peer_id}/{message_id})")));
        };
        let mut rotation = self.rotation.lock().unwrap();
        *rotation = rotation.wrapping_add(1);
        let fresh = ReferenceBytes::from(vec![0xcd, 0x34, *rotation]);
        current.insert((peer_id, message_id), fresh.clone());
        Ok(ReferenceUpdates::new().with(old, fresh))
    }
}

// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    if std::env::var("RUST_LOG").is_err() {
        unsafe { std::env::set_var("RUST_LOG", "mtwire_client=debug,mtwire_demo=info"); }
    }
    env_logger::init();
    if let Err(e) = run().await {
        eprintln!("✗ {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let services = Services::start(Config::default(), MemoryServer::default());
    log::info!("services started, dispatcher is {:?}", services.dispatcher.state());

    // ── Crypto offload ────────────────────────────────────────────────────
    let d = &services.dispatcher;
    let digest = d.sha256(b"mtwire".to_vec()).await?;
    println!("sha256(\"mtwire\")  = {}", hex::encode(digest));

    let (p, q) = d.factorize(1470626929934143021).await?;
    println!("factorize(pq)     = {p} × {q}");

    let key = [0x11u8; 32];
    let iv  = [0x22u8; 32];
    let cipher = d.aes_encrypt(b"sixteen byte msg".to_vec(), key, iv).await?;
    let plain  = d.aes_decrypt(cipher.clone(), key, iv).await?;
    println!("aes-ige           = {} → {:?}", hex::encode(&cipher), String::from_utf8_lossy(&plain));

    // ── Padded framing ────────────────────────────────────────────────────
    let (near, mut far) = tokio::io::duplex(1024);
    let mut transport = services.transport(near);
    transport.send(&[0u8, 1, 2, 3, 4, 5, 6, 7]).await?;

    let mut tag = [0u8; 4];
    far.read_exact(&mut tag).await?;
    let mut peer = mtwire_client::FramedTransport::new(far, PaddedIntermediate);
    println!("padded frame      = tag {} payload {:?}", hex::encode(tag), peer.recv().await?);

    // ── File-reference refresh ────────────────────────────────────────────
    let refs = &services.references;
    let expired = ReferenceBytes::from(vec![0xab, 0x12]);
    refs.refetcher().publish(5, 100, expired.clone());
    refs.save_context(&expired, ReferenceContext::Message { peer_id: 5, message_id: 100 });

    let handle = refs.spawn_refresh_service();
    let fresh = handle.refresh(expired.clone(), None).await?;
    println!("refreshed         = {} → {}", expired.to_hex(), fresh.to_hex());

    let unknown = handle.refresh(ReferenceBytes::from(vec![0xff]), None).await;
    if let Err(e) = unknown {
        println!("unknown reference = {e} ({})", e.user_message());
    }

    services.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_server_rotates_references() {
        let server = MemoryServer::default();
        let first = ReferenceBytes::from(vec![1]);
        server.publish(1, 1, first.clone());

        let updates = server.refetch_message(1, 1).await.unwrap();
        let second = updates.get(&first).unwrap().clone();
        assert_ne!(second, first);

        let updates = server.refetch_message(1, 1).await.unwrap();
        assert_ne!(updates.get(&second).unwrap(), &second);
    }

    #[tokio::test]
    async fn unknown_message_fails() {
        let server = MemoryServer::default();
        assert!(matches!(server.refetch_message(9, 9).await, Err(RefetchError::Failed(_))));
    }
}
