//! Link layer scenarios over the simulated air

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

use nowtalk_link::codec;
use nowtalk_link::constants::MAX_PAYLOAD;
use nowtalk_link::error::{PeerError, SendError};
use nowtalk_link::events::{Event, EventBus, EventKind};
use nowtalk_link::network::{LinkLayer, LinkOptions, RadioProbe, SimulatedAir};
use nowtalk_link::peers::PeerParams;
use nowtalk_link::protocol::{Destination, MacAddress, PacketKind};

fn mac(s: &str) -> MacAddress {
    s.parse().unwrap()
}

fn recorder(bus: &EventBus, kinds: &[EventKind]) -> Arc<Mutex<Vec<Event>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    for kind in kinds {
        let seen = seen.clone();
        bus.subscribe(*kind, move |event| {
            seen.lock().push(event.clone());
            Ok(())
        });
    }
    seen
}

fn station(air: &SimulatedAir, address: &str, options: LinkOptions) -> (LinkLayer, RadioProbe) {
    let radio = air.radio(mac(address));
    let probe = radio.probe();
    let link = LinkLayer::new(Box::new(radio), options, Arc::new(EventBus::new())).unwrap();
    (link, probe)
}

#[test]
fn unicast_to_known_peer_on_channel_six() {
    let air = SimulatedAir::new();
    let (link, probe) = station(
        &air,
        "24:6F:28:00:00:01",
        LinkOptions {
            channel: 6,
            ..Default::default()
        },
    );
    let events = recorder(link.events(), &[EventKind::PacketSent]);

    let peer = mac("AA:BB:CC:DD:EE:FF");
    link.add_peer(peer, PeerParams::default()).unwrap();
    link.send(Destination::Unicast(peer), &[7u8; 10]).unwrap();

    let sent = probe.transmitted();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].channel, 6);
    assert_eq!(sent[0].destination, Destination::Unicast(peer));

    let packet = codec::decode(&sent[0].data).unwrap();
    assert_eq!(packet.kind, PacketKind::Data);
    assert_eq!(&packet.payload[..], &[7u8; 10]);

    assert_eq!(
        *events.lock(),
        vec![Event::PacketSent {
            destination: Destination::Unicast(peer),
            kind: PacketKind::Data,
            payload: Bytes::from(vec![7u8; 10]),
        }]
    );
}

#[test]
fn unicast_to_unknown_peer_without_auto_add() {
    let air = SimulatedAir::new();
    let (link, probe) = station(&air, "24:6F:28:00:00:01", LinkOptions::default());
    let stranger = mac("02:00:00:00:00:99");

    assert_eq!(
        link.send(Destination::Unicast(stranger), b"hi"),
        Err(SendError::PeerUnknown(stranger))
    );
    assert!(probe.transmitted().is_empty());
    assert!(link.peers().is_empty());
}

#[test]
fn unicast_to_unknown_peer_with_auto_add() {
    let air = SimulatedAir::new();
    let (link, probe) = station(
        &air,
        "24:6F:28:00:00:01",
        LinkOptions {
            auto_new_peer: true,
            ..Default::default()
        },
    );
    let events = recorder(link.events(), &[EventKind::NewPeer, EventKind::PacketSent]);
    let stranger = mac("02:00:00:00:00:99");

    link.send(Destination::Unicast(stranger), b"hi").unwrap();

    assert!(link.peers().contains(&stranger));
    assert_eq!(probe.transmitted().len(), 1);
    let events = events.lock();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0], Event::NewPeer { address: stranger });
    assert_eq!(events[1].kind(), EventKind::PacketSent);
}

#[test]
fn unicast_to_broadcast_address_goes_out_as_broadcast() {
    let air = SimulatedAir::new();
    let (link, probe) = station(
        &air,
        "24:6F:28:00:00:01",
        LinkOptions {
            auto_new_peer: true,
            ..Default::default()
        },
    );
    let events = recorder(link.events(), &[EventKind::NewPeer, EventKind::PacketSent]);

    link.send(Destination::Unicast(MacAddress::BROADCAST), b"all").unwrap();

    assert!(link.peers().is_empty());
    assert_eq!(probe.transmitted()[0].destination, Destination::Broadcast);
    assert_eq!(
        *events.lock(),
        vec![Event::PacketSent {
            destination: Destination::Broadcast,
            kind: PacketKind::Data,
            payload: Bytes::from_static(b"all"),
        }]
    );
    assert_eq!(
        link.add_peer(MacAddress::BROADCAST, PeerParams::default()),
        Err(PeerError::BroadcastAddress)
    );
}

#[test]
fn peer_channel_override_retunes_for_unicast() {
    let air = SimulatedAir::new();
    let (sender, probe) = station(&air, "24:6F:28:00:00:01", LinkOptions::default());
    let (far, _) = station(
        &air,
        "24:6F:28:00:00:02",
        LinkOptions {
            channel: 11,
            ..Default::default()
        },
    );
    let (near, _) = station(&air, "24:6F:28:00:00:03", LinkOptions::default());
    let far_addr = mac("24:6F:28:00:00:02");

    sender
        .add_peer(far_addr, PeerParams { channel: Some(11) })
        .unwrap();
    sender.send(Destination::Unicast(far_addr), b"over").unwrap();

    let heard = far.poll(Instant::now());
    assert_eq!(heard.len(), 1);
    assert_eq!(&heard[0].packet.payload[..], b"over");
    assert_eq!(probe.transmitted()[0].channel, 11);

    // Back on the link channel afterwards
    assert_eq!(sender.channel(), 1);
    sender.send(Destination::Broadcast, b"home").unwrap();
    assert_eq!(probe.transmitted()[1].channel, 1);
    assert_eq!(near.poll(Instant::now()).len(), 1);
    assert!(far.poll(Instant::now()).is_empty());
}

#[test]
fn broadcast_with_empty_peer_table() {
    let air = SimulatedAir::new();
    let (sender, probe) = station(&air, "24:6F:28:00:00:01", LinkOptions::default());
    let (listener, _) = station(&air, "24:6F:28:00:00:02", LinkOptions::default());

    sender.send(Destination::Broadcast, b"all").unwrap();
    assert_eq!(probe.transmitted()[0].destination, Destination::Broadcast);
    assert!(sender.peers().is_empty());

    let heard = listener.poll(Instant::now());
    assert_eq!(heard.len(), 1);
    assert_eq!(heard[0].packet.destination, Destination::Broadcast);
    assert_eq!(&heard[0].packet.payload[..], b"all");
}

#[test]
fn duplicate_peer_rejected() {
    let air = SimulatedAir::new();
    let (link, _) = station(&air, "24:6F:28:00:00:01", LinkOptions::default());
    let peer = mac("AA:BB:CC:DD:EE:FF");

    link.add_peer(peer, PeerParams::default()).unwrap();
    assert_eq!(
        link.add_peer(peer, PeerParams::default()),
        Err(PeerError::DuplicatePeer(peer))
    );
    assert_eq!(link.peers().len(), 1);
}

#[test]
fn oversized_payload_never_transmitted() {
    let air = SimulatedAir::new();
    let (link, probe) = station(&air, "24:6F:28:00:00:01", LinkOptions::default());

    assert_eq!(
        link.send(Destination::Broadcast, &vec![0u8; MAX_PAYLOAD + 1]),
        Err(SendError::PayloadTooLarge {
            len: MAX_PAYLOAD + 1,
            max: MAX_PAYLOAD
        })
    );
    assert_eq!(probe.attempts(), 0);

    link.send(Destination::Broadcast, &vec![0u8; MAX_PAYLOAD]).unwrap();
    assert_eq!(probe.transmitted().len(), 1);
}

#[test]
fn auto_discovery_on_receive() {
    let air = SimulatedAir::new();
    let (a, _) = station(
        &air,
        "24:6F:28:00:00:01",
        LinkOptions {
            auto_new_peer: true,
            ..Default::default()
        },
    );
    let (b, _) = station(&air, "24:6F:28:00:00:02", LinkOptions::default());
    let events = recorder(a.events(), &[EventKind::NewPeer, EventKind::PacketReceived]);

    b.send(Destination::Broadcast, b"x").unwrap();
    b.send(Destination::Broadcast, b"y").unwrap();
    a.poll(Instant::now());

    // One NewPeer for the first packet only
    let kinds: Vec<EventKind> = events.lock().iter().map(Event::kind).collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::NewPeer,
            EventKind::PacketReceived,
            EventKind::PacketReceived
        ]
    );
    assert!(a.peers().contains(&mac("24:6F:28:00:00:02")));
}

#[test]
fn discovery_evicts_when_full() {
    let air = SimulatedAir::new();
    let (hub, _) = station(
        &air,
        "24:6F:28:00:00:01",
        LinkOptions {
            auto_new_peer: true,
            max_peers: 2,
            ..Default::default()
        },
    );
    let removed = recorder(hub.events(), &[EventKind::PeerRemoved]);

    let start = Instant::now();
    let others: Vec<_> = (2..=4)
        .map(|i| station(&air, &format!("24:6F:28:00:00:0{}", i), LinkOptions::default()).0)
        .collect();

    for (i, other) in others.iter().enumerate() {
        other.send(Destination::Broadcast, b"hello").unwrap();
        hub.poll(start + Duration::from_millis(i as u64 * 10));
    }

    assert_eq!(hub.peers().len(), 2);
    assert!(!hub.peers().contains(&mac("24:6F:28:00:00:02")));
    assert_eq!(
        *removed.lock(),
        vec![Event::PeerRemoved {
            address: mac("24:6F:28:00:00:02")
        }]
    );
}

#[test]
fn channel_change_isolates_stations() {
    let air = SimulatedAir::new();
    let (a, _) = station(&air, "24:6F:28:00:00:01", LinkOptions::default());
    let (b, _) = station(&air, "24:6F:28:00:00:02", LinkOptions::default());

    b.set_channel(11).unwrap();
    a.send(Destination::Broadcast, b"lost").unwrap();
    assert!(b.poll(Instant::now()).is_empty());

    a.set_channel(11).unwrap();
    a.send(Destination::Broadcast, b"found").unwrap();
    assert_eq!(b.poll(Instant::now()).len(), 1);
}

#[test]
fn peers_expire_and_revive() {
    let air = SimulatedAir::new();
    let (a, _) = station(&air, "24:6F:28:00:00:01", LinkOptions::default());
    let (b, _) = station(&air, "24:6F:28:00:00:02", LinkOptions::default());
    let b_addr = mac("24:6F:28:00:00:02");
    a.add_peer(b_addr, PeerParams::default()).unwrap();

    let start = Instant::now();
    b.send(Destination::Broadcast, b"hi").unwrap();
    a.poll(start);

    let expired = a.expire_peers(start + Duration::from_secs(31), Duration::from_secs(30));
    assert_eq!(expired, vec![b_addr]);
    assert!(a.peers().list_active().is_empty());

    b.send(Destination::Broadcast, b"back").unwrap();
    a.poll(start + Duration::from_secs(32));
    assert_eq!(a.peers().list_active().len(), 1);
}
