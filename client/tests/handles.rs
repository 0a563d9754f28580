mod common;

use common::{fixture_bytes, ServiceHarness};
use sslc_client::{
    DefaultClientCert, DefaultRootCert, HandleKind, ServiceConnection, SslcError,
};
use sslc_common::platform_socket::connect_socket;

#[test]
fn add_and_remove_commute_on_distinct_entries() {
    let service = ServiceHarness::start();
    let conn = service.connect();
    let root = fixture_bytes("root-ca.der");

    let chain = conn.create_root_cert_chain().unwrap();
    let a = conn.add_trusted_root_ca(chain, &root).unwrap();
    let b = conn.add_default_cert(chain, DefaultRootCert::NintendoCa).unwrap();
    assert_ne!(a.id(), b.id());
    assert_eq!(a.chain(), chain);

    conn.remove_cert(chain, b).unwrap();
    let c = conn.add_default_cert(chain, DefaultRootCert::NintendoCa).unwrap();
    conn.remove_cert(chain, a).unwrap();
    conn.remove_cert(chain, c).unwrap();

    // Ids are never reused
    assert!(c.id() > b.id());
    assert!(matches!(
        conn.remove_cert(chain, a),
        Err(SslcError::InvalidHandle {
            kind: HandleKind::CertEntry,
            ..
        })
    ));
}

#[test]
fn destroyed_chain_invalidates_chain_and_entries() {
    let service = ServiceHarness::start();
    let conn = service.connect();

    let chain = conn.create_root_cert_chain().unwrap();
    let entry = conn.add_default_cert(chain, DefaultRootCert::NintendoCa).unwrap();
    conn.destroy_root_cert_chain(chain).unwrap();

    assert!(matches!(
        conn.destroy_root_cert_chain(chain),
        Err(SslcError::InvalidHandle {
            kind: HandleKind::RootCertChain,
            ..
        })
    ));
    assert!(matches!(
        conn.remove_cert(chain, entry),
        Err(SslcError::InvalidHandle { .. })
    ));
    assert!(matches!(
        conn.add_default_cert(chain, DefaultRootCert::NintendoCa),
        Err(SslcError::InvalidHandle { .. })
    ));
}

#[test]
fn entry_from_another_chain_cannot_be_removed() {
    let service = ServiceHarness::start();
    let conn = service.connect();

    let first = conn.create_root_cert_chain().unwrap();
    let second = conn.create_root_cert_chain().unwrap();
    let entry = conn.add_default_cert(first, DefaultRootCert::NintendoCa).unwrap();

    assert!(matches!(
        conn.remove_cert(second, entry),
        Err(SslcError::InvalidHandle {
            kind: HandleKind::CertEntry,
            ..
        })
    ));
    conn.remove_cert(first, entry).unwrap();
}

#[test]
fn chain_capacity_is_enforced() {
    let service = ServiceHarness::start_with(|config| config.with_max_chain_certs(2));
    let conn = service.connect();

    let chain = conn.create_root_cert_chain().unwrap();
    conn.add_default_cert(chain, DefaultRootCert::NintendoCa).unwrap();
    conn.add_default_cert(chain, DefaultRootCert::NintendoCa).unwrap();
    assert!(matches!(
        conn.add_default_cert(chain, DefaultRootCert::NintendoCa),
        Err(SslcError::ResourceExhausted(_))
    ));
}

#[test]
fn handle_table_capacity_is_enforced() {
    let service = ServiceHarness::start_with(|config| config.with_max_handles(3));
    let conn = service.connect();

    let chains: Vec<_> = (0..3)
        .map(|_| conn.create_root_cert_chain().unwrap())
        .collect();
    assert!(matches!(
        conn.create_root_cert_chain(),
        Err(SslcError::ResourceExhausted(_))
    ));

    conn.destroy_root_cert_chain(chains[0]).unwrap();
    conn.create_root_cert_chain().unwrap();
}

#[test]
fn malformed_certificates_and_keys_are_rejected() {
    let service = ServiceHarness::start();
    let conn = service.connect();
    let cert = fixture_bytes("client.der");
    let key = fixture_bytes("client.key.der");

    let chain = conn.create_root_cert_chain().unwrap();
    assert!(matches!(
        conn.add_trusted_root_ca(chain, b"not a certificate"),
        Err(SslcError::CertFormat(_))
    ));
    assert!(matches!(
        conn.add_trusted_root_ca(chain, &[]),
        Err(SslcError::InvalidArgument(_))
    ));

    assert!(matches!(
        conn.open_client_cert_context(b"garbage", &key),
        Err(SslcError::CertFormat(_))
    ));
    assert!(matches!(
        conn.open_client_cert_context(&cert, b"garbage"),
        Err(SslcError::KeyFormat(_))
    ));

    let ctx = conn.open_client_cert_context(&cert, &key).unwrap();
    conn.close_client_cert_context(ctx).unwrap();
    assert!(matches!(
        conn.close_client_cert_context(ctx),
        Err(SslcError::InvalidHandle {
            kind: HandleKind::ClientCert,
            ..
        })
    ));
}

#[test]
fn unprovisioned_builtins_are_invalid_arguments() {
    let service = ServiceHarness::start();
    let conn = service.connect();

    let chain = conn.create_root_cert_chain().unwrap();
    assert!(matches!(
        conn.add_default_cert(chain, DefaultRootCert::DigiCertEv),
        Err(SslcError::InvalidArgument(_))
    ));

    let empty = tempfile::tempdir().unwrap();
    let bare = ServiceHarness::start_with(|config| config.with_certs_dir(empty.path()));
    let bare_conn = bare.connect();
    assert!(matches!(
        bare_conn.open_default_client_cert_context(DefaultClientCert::ClCertA),
        Err(SslcError::InvalidArgument(_))
    ));
}

#[test]
fn random_data_respects_the_ceiling() {
    let service = ServiceHarness::start();
    let conn = service.connect();

    conn.seed_rng().unwrap();
    conn.seed_rng().unwrap();
    assert!(conn.generate_random_data(0).unwrap().is_empty());

    let a = conn.generate_random_data(32).unwrap();
    let b = conn.generate_random_data(32).unwrap();
    assert_eq!(a.len(), 32);
    assert_ne!(a, b);

    assert_eq!(conn.generate_random_data(0x1000).unwrap().len(), 0x1000);
    assert!(matches!(
        conn.generate_random_data(0x1001),
        Err(SslcError::RequestTooLarge(_))
    ));
}

#[test]
fn handles_do_not_outlive_their_connection() {
    let service = ServiceHarness::start();

    let conn = service.connect();
    let chain = conn.create_root_cert_chain().unwrap();
    conn.teardown();

    // A fresh connection starts from an empty table
    let conn = service.connect();
    assert!(matches!(
        conn.destroy_root_cert_chain(chain),
        Err(SslcError::InvalidHandle { .. })
    ));
}

#[test]
fn adopted_socket_skips_initialization() {
    let service = ServiceHarness::start();
    let socket = connect_socket(service.socket(), None).unwrap();

    let conn = ServiceConnection::from_existing(socket);
    let chain = conn.create_root_cert_chain().unwrap();
    conn.destroy_root_cert_chain(chain).unwrap();
    conn.teardown();
}

#[test]
fn missing_service_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let config = sslc_client::ClientConfig::new()
        .with_socket_name(dir.path().join("nobody.sock").to_string_lossy());
    assert!(matches!(
        ServiceConnection::initialize(config),
        Err(SslcError::ServiceUnavailable(_))
    ));
}
