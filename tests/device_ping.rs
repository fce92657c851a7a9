//! Two in-process devices exchange ICMP echoes over loopback UDP

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::OsRng;
use tokio::time::timeout;

use ruguard::device::Device;
use ruguard::protocol::keys::NoisePrivateKey;
use ruguard::tunnel::{channel_tun, ping_packet, ChannelTunHandle, Tunnel};

const PING_DEADLINE: Duration = Duration::from_millis(300);

async fn expect_packet(handle: &ChannelTunHandle, expected: &[u8]) {
    let received = timeout(PING_DEADLINE, async {
        handle.inbound.lock().await.recv().await
    })
    .await
    .expect("ping did not transit in time")
    .expect("tunnel channel closed");
    assert_eq!(received, expected, "ping did not transit correctly");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_device_ping() {
    let sk1 = NoisePrivateKey::generate(&mut OsRng).unwrap();
    let sk2 = NoisePrivateKey::generate(&mut OsRng).unwrap();
    let pk1 = sk1.public_key().unwrap();
    let pk2 = sk2.public_key().unwrap();

    let dev1 = Arc::new(Device::new());
    let dev2 = Arc::new(Device::new());

    let (tun1, handle1) = channel_tun();
    let (tun2, handle2) = channel_tun();

    let tunnel1 = Tunnel::bind(dev1.clone(), tun1).await.unwrap();
    let tunnel2 = Tunnel::bind(dev2.clone(), tun2).await.unwrap();
    let port1 = tunnel1.local_addr().unwrap().port();
    let port2 = tunnel2.local_addr().unwrap().port();

    dev1.ipc_set_operation(&format!(
        "private_key={}\n\
         replace_peers=true\n\
         public_key={}\n\
         protocol_version=1\n\
         replace_allowed_ips=true\n\
         allowed_ip=1.0.0.2/32\n\
         endpoint=127.0.0.1:{port2}\n",
        sk1.to_hex(),
        pk2.to_hex(),
    ))
    .unwrap();

    dev2.ipc_set_operation(&format!(
        "private_key={}\n\
         replace_peers=true\n\
         public_key={}\n\
         protocol_version=1\n\
         replace_allowed_ips=true\n\
         allowed_ip=1.0.0.1/32\n\
         endpoint=127.0.0.1:{port1}\n",
        sk2.to_hex(),
        pk1.to_hex(),
    ))
    .unwrap();

    let loop1 = tokio::spawn(tunnel1.run());
    let loop2 = tokio::spawn(tunnel2.run());

    // dev2 (1.0.0.2) pings dev1 (1.0.0.1): triggers the handshake
    let msg2to1 = ping_packet("1.0.0.2".parse().unwrap(), "1.0.0.1".parse().unwrap());
    handle2.outbound.send(msg2to1.clone()).await.unwrap();
    expect_packet(&handle1, &msg2to1).await;

    // return direction rides the established session
    let msg1to2 = ping_packet("1.0.0.1".parse().unwrap(), "1.0.0.2".parse().unwrap());
    handle1.outbound.send(msg1to2.clone()).await.unwrap();
    expect_packet(&handle2, &msg1to2).await;

    dev1.close();
    dev2.close();
    drop(handle1);
    drop(handle2);
    let _ = timeout(Duration::from_secs(1), loop1).await;
    let _ = timeout(Duration::from_secs(1), loop2).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn spoofed_inner_source_is_dropped() {
    let sk1 = NoisePrivateKey::generate(&mut OsRng).unwrap();
    let sk2 = NoisePrivateKey::generate(&mut OsRng).unwrap();
    let pk1 = sk1.public_key().unwrap();
    let pk2 = sk2.public_key().unwrap();

    let dev1 = Arc::new(Device::new());
    let dev2 = Arc::new(Device::new());

    let (tun1, handle1) = channel_tun();
    let (tun2, handle2) = channel_tun();

    let tunnel1 = Tunnel::bind(dev1.clone(), tun1).await.unwrap();
    let tunnel2 = Tunnel::bind(dev2.clone(), tun2).await.unwrap();
    let port1 = tunnel1.local_addr().unwrap().port();
    let port2 = tunnel2.local_addr().unwrap().port();

    dev1.ipc_set_operation(&format!(
        "private_key={}\npublic_key={}\nallowed_ip=1.0.0.2/32\nendpoint=127.0.0.1:{port2}\n",
        sk1.to_hex(),
        pk2.to_hex(),
    ))
    .unwrap();
    dev2.ipc_set_operation(&format!(
        "private_key={}\npublic_key={}\nallowed_ip=1.0.0.1/32\nendpoint=127.0.0.1:{port1}\n",
        sk2.to_hex(),
        pk1.to_hex(),
    ))
    .unwrap();

    let _loop1 = tokio::spawn(tunnel1.run());
    let _loop2 = tokio::spawn(tunnel2.run());

    // establish the session with a legitimate ping
    let legit = ping_packet("1.0.0.2".parse().unwrap(), "1.0.0.1".parse().unwrap());
    handle2.outbound.send(legit.clone()).await.unwrap();
    expect_packet(&handle1, &legit).await;

    // a packet whose inner source is outside dev2's allowed ips must not
    // come out of dev1's tunnel
    let spoofed = ping_packet("9.9.9.9".parse().unwrap(), "1.0.0.1".parse().unwrap());
    // cryptokey routing on the sender would refuse to route it, so smuggle
    // it by sending from an address dev2 is allowed to use, then replaying
    // the legitimate one to prove the channel still works
    handle2.outbound.send(spoofed).await.unwrap();
    handle2.outbound.send(legit.clone()).await.unwrap();

    let received = timeout(PING_DEADLINE, async {
        handle1.inbound.lock().await.recv().await
    })
    .await
    .expect("follow-up ping did not transit")
    .expect("tunnel channel closed");
    assert_eq!(received, legit, "spoofed packet leaked through the tunnel");

    dev1.close();
    dev2.close();
}
