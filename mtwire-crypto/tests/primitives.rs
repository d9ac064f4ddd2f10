use mtwire_crypto::{aes, sha1, sha256};

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[test]
fn sha1_abc() {
    assert_eq!(hex(&sha1(b"abc")), "a9993e364706816aba3e25717850c26c9cd0d89d");
}

#[test]
fn sha256_abc() {
    assert_eq!(
        hex(&sha256(b"abc")),
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
}

#[test]
fn sha_macros_concatenate() {
    assert_eq!(mtwire_crypto::sha256!(b"a", b"bc"), sha256(b"abc"));
    assert_eq!(mtwire_crypto::sha1!(b"ab", b"c"), sha1(b"abc"));
}

#[test]
fn ige_decrypt_inverts_encrypt() {
    let key = [0x11u8; 32];
    let iv  = [0x22u8; 32];
    let plain: Vec<u8> = (0u8..64).collect();

    let mut buf = plain.clone();
    aes::ige_encrypt(&mut buf, &key, &iv).unwrap();
    assert_ne!(buf, plain);
    aes::ige_decrypt(&mut buf, &key, &iv).unwrap();
    assert_eq!(buf, plain);
}

#[test]
fn ige_depends_on_iv() {
    let key = [0x11u8; 32];
    let mut a = vec![0u8; 32];
    let mut b = vec![0u8; 32];
    aes::ige_encrypt(&mut a, &key, &[0u8; 32]).unwrap();
    aes::ige_encrypt(&mut b, &key, &[1u8; 32]).unwrap();
    assert_ne!(a, b);
}
