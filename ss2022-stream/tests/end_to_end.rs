// End-to-end handshake and round-trip tests, exercised against the public
// API the way an embedding listener would use it: build a wire request by
// hand (standing in for a real client), run it through `accept`, write a
// response, and check what comes back -- without a real socket or
// transport loop, which live outside this crate.

use std::time::Duration;

use ss2022_crypto::aead::Aead;
use ss2022_crypto::kdf;
use ss2022_crypto::method::Method;

use ss2022_stream::{
    accept, decode_packet, encode_reply, Address, DatagramParams, Error, ListenerParams,
    UserTable,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn now_be() -> [u8; 8] {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
        .to_be_bytes()
}

async fn build_stream_request(
    method: Method,
    session_psk: &[u8],
    salt: &[u8],
    destination: &Address,
    payload: &[u8],
) -> Vec<u8> {
    let mut key = vec![0u8; method.salt_len()];
    kdf::session_key(session_psk, salt, &mut key);
    let aead = Aead::new(method.suite(), &key).unwrap();
    let mut writer = ss2022_stream::ChunkWriter::new(Vec::<u8>::new(), aead);
    let mut buf = Vec::new();

    let mut addr_buf = Vec::new();
    destination.encode(&mut addr_buf);
    let mut variable = Vec::new();
    variable.extend_from_slice(&addr_buf);
    variable.extend_from_slice(&0u16.to_be_bytes());
    variable.extend_from_slice(payload);

    let mut fixed = Vec::new();
    fixed.push(0x00);
    fixed.extend_from_slice(&now_be());
    fixed.extend_from_slice(&(variable.len() as u16).to_be_bytes());

    writer.write_raw(&mut buf, &fixed).unwrap();
    writer.write_raw(&mut buf, &variable).unwrap();

    let mut wire = Vec::new();
    wire.extend_from_slice(salt);
    wire.extend_from_slice(&buf);
    wire
}

#[tokio::test]
async fn handshake_then_response_round_trips_over_an_in_memory_duplex() {
    init_tracing();

    let method = Method::Blake3Aes256Gcm;
    let i_psk = vec![0x2au8; 32];
    let salt = vec![0x01u8; 32];
    let destination = Address::Domain {
        host: "upstream.example".to_string(),
        port: 443,
    };

    let request = build_stream_request(method, &i_psk, &salt, &destination, b"GET / HTTP/1.1").await;

    let (mut client, server) = tokio::io::duplex(8192);
    tokio::io::AsyncWriteExt::write_all(&mut client, &request)
        .await
        .unwrap();

    let params: ListenerParams<String> = ListenerParams::single_user(method, i_psk.clone());
    let mut accepted = accept(server, &params).await.unwrap();
    assert_eq!(accepted.destination, destination);

    let mut body = [0u8; 14]; // b"GET / HTTP/1.1".len()
    let n = accepted.reader.read(&mut body).await.unwrap();
    assert_eq!(&body[..n], b"GET / HTTP/1.1");

    accepted.writer.write(b"HTTP/1.1 200 OK").await.unwrap();

    let mut response = vec![0u8; 4096];
    let n = tokio::time::timeout(
        Duration::from_secs(1),
        tokio::io::AsyncReadExt::read(&mut client, &mut response),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(n > 0, "expected a non-empty response header");
}

#[tokio::test]
async fn multi_user_listener_distinguishes_two_simultaneous_users() {
    init_tracing();

    let method = Method::Blake3Aes128Gcm;
    let i_psk = vec![0x10u8; 16];
    let upsk_alice = vec![0xA1u8; 16];
    let upsk_bob = vec![0xB2u8; 16];

    let users: UserTable<String> = UserTable::new();
    users.insert("alice".to_string(), upsk_alice.clone());
    users.insert("bob".to_string(), upsk_bob.clone());
    let params = ListenerParams::multi_user(method, i_psk.clone(), users);

    for (name, upsk, salt_byte) in [("alice", &upsk_alice, 0x11u8), ("bob", &upsk_bob, 0x22u8)] {
        let salt = vec![salt_byte; 16];
        let mut isk = vec![0u8; 16];
        kdf::identity_subkey(&i_psk, &salt, &mut isk);
        let eih = ss2022_stream::identity::encrypt_eih(&isk, upsk).unwrap();

        let destination = Address::Ipv4 {
            addr: "127.0.0.1".parse().unwrap(),
            port: 9000,
        };
        let mut request = salt.clone();
        request.extend_from_slice(&eih);

        let mut key = vec![0u8; 16];
        kdf::session_key(upsk, &salt, &mut key);
        let aead = Aead::new(method.suite(), &key).unwrap();
        let mut writer = ss2022_stream::ChunkWriter::new(Vec::<u8>::new(), aead);
        let mut buf = Vec::new();

        let mut addr_buf = Vec::new();
        destination.encode(&mut addr_buf);
        let mut variable = Vec::new();
        variable.extend_from_slice(&addr_buf);
        variable.extend_from_slice(&0u16.to_be_bytes());
        variable.extend_from_slice(b"hi");

        let mut fixed = Vec::new();
        fixed.push(0x00);
        fixed.extend_from_slice(&now_be());
        fixed.extend_from_slice(&(variable.len() as u16).to_be_bytes());
        writer.write_raw(&mut buf, &fixed).unwrap();
        writer.write_raw(&mut buf, &variable).unwrap();
        request.extend_from_slice(&buf);

        let (mut client, server) = tokio::io::duplex(4096);
        tokio::io::AsyncWriteExt::write_all(&mut client, &request)
            .await
            .unwrap();
        let accepted = accept(server, &params).await.unwrap();
        assert_eq!(accepted.user.as_deref(), Some(name));
    }
}

#[test]
fn udp_session_created_on_first_packet_survives_a_reply_round_trip() {
    init_tracing();

    let method = Method::Blake3Aes128Gcm;
    let i_psk = vec![0x33u8; 16];
    let destination = Address::Ipv4 {
        addr: "203.0.113.7".parse().unwrap(),
        port: 853,
    };

    let salt_len = method.salt_len();
    let mut inner = Vec::new();
    inner.push(0x00u8);
    inner.extend_from_slice(&now_be());
    let mut addr_buf = Vec::new();
    destination.encode(&mut addr_buf);
    inner.extend_from_slice(&addr_buf);
    inner.extend_from_slice(&0u16.to_be_bytes());
    inner.extend_from_slice(b"dns-query-bytes!");

    let session_id = 0x9988_7766_5544_3322u64;
    let packet_id = 0u64;
    let mut session_salt = vec![0u8; salt_len];
    session_salt[..8].copy_from_slice(&session_id.to_be_bytes());
    let mut recv_key = vec![0u8; salt_len];
    kdf::session_key(&i_psk, &session_salt, &mut recv_key);
    let cipher = Aead::new(method.suite(), &recv_key).unwrap();

    let mut block0 = [0u8; 16];
    block0[..8].copy_from_slice(&session_id.to_be_bytes());
    block0[8..].copy_from_slice(&packet_id.to_be_bytes());
    let ct = cipher.seal(&block0[4..16], &[], &inner).unwrap();

    let mut block0_enc = block0;
    ss2022_crypto::block::encrypt_block(&i_psk, &mut block0_enc).unwrap();

    let mut raw = Vec::new();
    raw.extend_from_slice(&block0_enc);
    raw.extend_from_slice(&ct);

    let params: DatagramParams<String> =
        DatagramParams::single_user(method, i_psk.clone(), Duration::from_secs(30));
    let source: std::net::SocketAddr = "198.51.100.9:4000".parse().unwrap();
    let decoded = decode_packet(&raw, source, &params).unwrap();
    assert_eq!(decoded.destination, destination);
    assert_eq!(decoded.payload, b"dns-query-bytes!");

    let (session, created) = params.sessions.load_or_create(session_id, || {
        unreachable!("session must already exist from decode_packet above")
    });
    assert!(!created, "session from decode_packet should already be cached");
    let reply = encode_reply(&session, &i_psk, &destination, b"dns-answer").unwrap();
    assert!(reply.len() > 16, "reply must carry a sealed header + body");

    let replay = decode_packet(&raw, source, &params);
    assert!(matches!(replay, Err(Error::PacketIdNotUnique)));
}
