/// SHA-1 over the concatenation of one or more byte slices, as `[u8; 20]`.
///
/// ```
/// let whole = mtwire_crypto::sha1!(b"abc");
/// assert_eq!(whole, mtwire_crypto::sha1!(b"a", b"bc"));
/// ```
#[macro_export]
macro_rules! sha1 {
    ( $( $part:expr ),+ $(,)? ) => {
        $crate::__digest!($crate::__private::sha1::Sha1, 20; $( $part ),+)
    };
}

/// SHA-256 over the concatenation of one or more byte slices, as `[u8; 32]`.
#[macro_export]
macro_rules! sha256 {
    ( $( $part:expr ),+ $(,)? ) => {
        $crate::__digest!($crate::__private::sha2::Sha256, 32; $( $part ),+)
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __digest {
    ( $hasher:path, $len:literal; $( $part:expr ),+ ) => {{
        let mut hasher = <$hasher>::default();
        $( $crate::__private::Digest::update(&mut hasher, $part); )+
        let out: [u8; $len] = $crate::__private::Digest::finalize(hasher).into();
        out
    }};
}
