//! A mock network stub which passes messages from and to threads using channels.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex};

use rand::Rng;

use gracht_rs::networking::{Message, Network, NetworkEvent, PeerId};

#[derive(Clone)]
pub(crate) struct MockNetwork {
    pub(crate) me: PeerId,
    outboxes: Arc<Mutex<HashMap<PeerId, Sender<NetworkEvent>>>>,
    inbox: Arc<Mutex<Receiver<NetworkEvent>>>,
}

impl Network for MockNetwork {
    fn send(&mut self, peer: PeerId, message: Message) {
        if let Some(outbox) = self.outboxes.lock().unwrap().get(&peer) {
            let _ = outbox.send(NetworkEvent::Message(self.me, message));
        }
    }

    fn broadcast(&mut self, message: Message) {
        for (peer, outbox) in self.outboxes.lock().unwrap().iter() {
            if *peer != self.me {
                let _ = outbox.send(NetworkEvent::Message(self.me, message.clone()));
            }
        }
    }

    fn random_peer(&mut self) -> Option<PeerId> {
        let outboxes = self.outboxes.lock().unwrap();
        let others: Vec<PeerId> = outboxes.keys().copied().filter(|peer| *peer != self.me).collect();
        if others.is_empty() {
            return None;
        }
        let index = rand::thread_rng().gen_range(0, others.len());
        Some(others[index])
    }

    fn recv(&mut self) -> Option<NetworkEvent> {
        match self.inbox.lock().unwrap().try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => panic!("mock network inbox disconnected"),
        }
    }
}

/// A fully connected set of `n` network stubs.
pub(crate) fn mock_network(n: usize) -> Vec<MockNetwork> {
    let outboxes = Arc::new(Mutex::new(HashMap::new()));
    let mut stubs = Vec::new();
    for i in 0..n {
        let me = PeerId(i as u64);
        let (sender, receiver) = mpsc::channel();
        outboxes.lock().unwrap().insert(me, sender);
        stubs.push(MockNetwork {
            me,
            outboxes: outboxes.clone(),
            inbox: Arc::new(Mutex::new(receiver)),
        });
    }
    stubs
}

/// Signal both sides that a connection between `a` and `b` came up, so their pollers exchange
/// intro messages.
pub(crate) fn connect(a: &MockNetwork, b: &MockNetwork) {
    let outboxes = a.outboxes.lock().unwrap();
    if let Some(outbox) = outboxes.get(&a.me) {
        let _ = outbox.send(NetworkEvent::Connected(b.me));
    }
    if let Some(outbox) = outboxes.get(&b.me) {
        let _ = outbox.send(NetworkEvent::Connected(a.me));
    }
}
