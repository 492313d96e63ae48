use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout};

use apdhcpd::packet::MESSAGE_SIZE;
use apdhcpd::{Config, DhcpMessage, DhcpOption, DhcpServer, LoggingLink, MacAddr, MessageType};

const CLIENT_MAC: MacAddr = MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01]);

fn loopback_config(client_port: u16) -> Config {
    Config {
        server_address: "127.0.0.1".to_string(),
        gateway: "127.0.0.1".to_string(),
        netmask: "255.0.0.0".to_string(),
        dns_primary: "127.0.0.1".to_string(),
        dns_secondary: String::new(),
        pool_start: "127.0.0.2".to_string(),
        pool_end: "127.0.0.10".to_string(),
        lease_seconds: 600,
        server_port: 0,
        client_port,
        ..Default::default()
    }
}

async fn send(client: &UdpSocket, server: SocketAddr, message: &DhcpMessage) {
    let encoded = message.encode().unwrap();
    client.send_to(&encoded, server).await.unwrap();
}

async fn receive_ack(client: &UdpSocket) -> DhcpMessage {
    let mut buffer = [0u8; 1024];
    loop {
        let (size, _) = client.recv_from(&mut buffer).await.unwrap();
        assert_eq!(size, MESSAGE_SIZE);
        let message = DhcpMessage::decode(&buffer[..size]).unwrap();
        if message.message_type() == Some(MessageType::Ack) {
            return message;
        }
    }
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn test_dhcp_exchange_over_loopback() {
    let client = UdpSocket::bind("127.0.0.2:0").await.unwrap();
    let client_port = client.local_addr().unwrap().port();

    let link = Arc::new(LoggingLink::new());
    let server = DhcpServer::new(link.clone());
    server.start(loopback_config(client_port)).await.unwrap();
    let server_addr = SocketAddr::from((
        Ipv4Addr::LOCALHOST,
        server.local_addr().unwrap().port(),
    ));

    // Garbage must not stop the worker.
    client.send_to(&[1, 2, 3], server_addr).await.unwrap();

    // The OFFER is broadcast and never reaches the loopback client, so
    // watch the lease table instead.
    let discover = DhcpMessage::new_request(
        CLIENT_MAC,
        0xdead_beef,
        MessageType::Discover,
        Ipv4Addr::UNSPECIFIED,
        vec![],
    );
    send(&client, server_addr, &discover).await;
    wait_for(|| !server.leases().is_empty()).await;
    assert_eq!(server.leases()[0].ip, Ipv4Addr::new(127, 0, 0, 2));
    assert!(link.link_associated());

    // A configured client confirming its address is answered by unicast.
    let request = DhcpMessage::new_request(
        CLIENT_MAC,
        0xdead_bef0,
        MessageType::Request,
        Ipv4Addr::new(127, 0, 0, 2),
        vec![DhcpOption::RequestedIpAddress(Ipv4Addr::new(127, 0, 0, 2))],
    );
    send(&client, server_addr, &request).await;

    let ack = timeout(Duration::from_secs(5), receive_ack(&client))
        .await
        .expect("no ACK received");
    assert_eq!(ack.op, 2);
    assert_eq!(ack.xid, 0xdead_bef0);
    assert_eq!(ack.message_type(), Some(MessageType::Ack));
    assert_eq!(ack.yiaddr, Ipv4Addr::new(127, 0, 0, 2));
    assert!(ack.options.contains(&DhcpOption::RenewalTime(300)));
    assert!(ack.options.contains(&DhcpOption::RebindingTime(525)));
    assert!(ack.options.contains(&DhcpOption::LeaseTime(600)));
    assert!(link.ip_ready());

    let release = DhcpMessage::new_request(
        CLIENT_MAC,
        0xdead_bef1,
        MessageType::Release,
        Ipv4Addr::new(127, 0, 0, 2),
        vec![],
    );
    send(&client, server_addr, &release).await;
    wait_for(|| {
        server
            .leases()
            .first()
            .is_some_and(|lease| lease.released_at.is_some())
    })
    .await;

    server.stop().await;
    assert!(server.leases().is_empty());
}

#[tokio::test]
async fn test_disconnect_event_releases_lease() {
    let client = UdpSocket::bind("127.0.0.3:0").await.unwrap();
    let client_port = client.local_addr().unwrap().port();

    let link = Arc::new(LoggingLink::new());
    let server = DhcpServer::new(link.clone());
    server.start(loopback_config(client_port)).await.unwrap();
    let server_addr = SocketAddr::from((
        Ipv4Addr::LOCALHOST,
        server.local_addr().unwrap().port(),
    ));

    let discover = DhcpMessage::new_request(
        CLIENT_MAC,
        1,
        MessageType::Discover,
        Ipv4Addr::UNSPECIFIED,
        vec![],
    );
    send(&client, server_addr, &discover).await;
    wait_for(|| !server.leases().is_empty()).await;

    assert!(link.disconnect(CLIENT_MAC));
    assert!(!link.link_associated());
    assert!(server.leases()[0].released_at.is_some());

    server.stop().await;
    assert!(!link.disconnect(CLIENT_MAC));
}
