// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Transfer arbitration, agent authorization and service front-ends.

mod common;

use std::io::Write;
use std::sync::atomic::Ordering;
use tempfile::NamedTempFile;

use common::{answer, eventually, peer, read_packet, wait_for_sessions, Gate, Harness, PutMode};
use obex_client::obex::packet::{opcode, response};
use obex_client::obex::{Header, Packet};
use obex_client::services::map::{self, MessageAccess};
use obex_client::services::pbap::{self, PhonebookAccess};
use obex_client::{Error, SessionHandle, SessionRequest, SessionState, TransferSpec};

async fn ready(h: &Harness, service: &str) -> SessionHandle {
    h.client
        .connect(SessionRequest::new(peer(), service))
        .await
        .unwrap()
}

fn temp_file(contents: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents).unwrap();
    file.flush().unwrap();
    file
}

fn file_name(file: &NamedTempFile) -> String {
    file.path().file_name().unwrap().to_string_lossy().into_owned()
}

#[tokio::test]
async fn test_second_put_is_refused() {
    let h = Harness::new();
    *h.engine.put_mode.lock() = PutMode::Stall;
    let session = ready(&h, "opp").await;

    let _first = session
        .put(TransferSpec::new().target_name("a.txt").buffer(vec![1; 10]))
        .await
        .unwrap();
    let second = session
        .put(TransferSpec::new().target_name("b.txt").buffer(vec![2; 10]))
        .await;

    assert!(matches!(second, Err(Error::AlreadyConnected)));
    assert_eq!(session.snapshot().await.unwrap().pending_transfers, 1);

    // Gets are not arbitrated against puts.
    let listing = session.pull("x-obex/folder-listing", None).await.unwrap();
    listing.finished().await.unwrap();
    eventually("first put to start", || h.engine.puts.lock().len() == 1).await;
    assert_eq!(h.engine.put_names(), vec![Some("a.txt".to_string())]);
}

#[tokio::test]
async fn test_completion_by_size_advances_queue() {
    let h = Harness::new();
    *h.engine.put_mode.lock() = PutMode::ReportThenStall;
    let session = ready(&h, "opp").await;
    let file = temp_file(b"hello");

    let first = session
        .put(TransferSpec::new().target_name("a.txt").buffer(vec![7; 10]))
        .await
        .unwrap();
    let second = session.send(file.path(), None).await.unwrap();

    let outcome = first.finished().await.unwrap();
    assert_eq!(outcome.name.as_deref(), Some("a.txt"));
    assert_eq!(outcome.size, 10);

    let outcome = second.finished().await.unwrap();
    assert_eq!(outcome.name, Some(file_name(&file)));
    assert_eq!(outcome.size, 5);

    let puts = h.engine.puts.lock().clone();
    assert_eq!(puts.len(), 2);
    assert_eq!(puts[1].1, b"hello".to_vec());
    assert_eq!(session.snapshot().await.unwrap().pending_transfers, 0);

    // Both stalled data tasks were stopped once their transfer completed.
    eventually("data tasks to stop", || {
        h.engine.aborted.load(Ordering::SeqCst) == 2
    })
    .await;
}

#[tokio::test]
async fn test_send_waits_for_queue_head() {
    let h = Harness::new();
    *h.engine.put_mode.lock() = PutMode::Stall;
    let session = ready(&h, "opp").await;
    let file = temp_file(b"queued");

    let head = session
        .put(TransferSpec::new().target_name("head").buffer(vec![0; 4]))
        .await
        .unwrap();
    let queued = session.send(file.path(), Some("renamed.txt")).await.unwrap();
    eventually("head to start", || h.engine.puts.lock().len() == 1).await;
    assert_eq!(session.snapshot().await.unwrap().pending_transfers, 2);

    *h.engine.put_mode.lock() = PutMode::Finish;
    session.cancel_transfer(head.id).await.unwrap();
    assert!(matches!(head.finished().await, Err(Error::Cancelled)));

    let outcome = queued.finished().await.unwrap();
    assert_eq!(outcome.name.as_deref(), Some("renamed.txt"));
    assert_eq!(
        h.engine.put_names(),
        vec![Some("head".to_string()), Some("renamed.txt".to_string())]
    );
}

#[tokio::test]
async fn test_cancel_unknown_transfer() {
    let h = Harness::new();
    *h.engine.put_mode.lock() = PutMode::Stall;
    let session = ready(&h, "opp").await;

    let ticket = session
        .put(TransferSpec::new().buffer(vec![1; 3]))
        .await
        .unwrap();
    let id = ticket.id;
    session.cancel_transfer(id).await.unwrap();
    assert!(matches!(ticket.finished().await, Err(Error::Cancelled)));
    assert!(matches!(
        session.cancel_transfer(id).await,
        Err(Error::InvalidArguments(_))
    ));

    // The queue is free again.
    assert!(session.put(TransferSpec::new().buffer(vec![1])).await.is_ok());
}

#[tokio::test]
async fn test_failed_put_leaves_session_ready() {
    let h = Harness::new();
    *h.engine.put_mode.lock() = PutMode::Refuse;
    let session = ready(&h, "opp").await;

    let failed = session
        .put(TransferSpec::new().target_name("a.txt").buffer(vec![1; 4]))
        .await
        .unwrap();
    assert!(matches!(
        failed.finished().await,
        Err(Error::Protocol {
            operation: "Put",
            code: 0xC3
        })
    ));

    let snapshot = session.snapshot().await.unwrap();
    assert_eq!(snapshot.state, SessionState::Ready);
    assert_eq!(snapshot.pending_transfers, 0);

    *h.engine.put_mode.lock() = PutMode::Finish;
    let retry = session
        .put(TransferSpec::new().target_name("b.txt").buffer(vec![2; 4]))
        .await
        .unwrap();
    retry.finished().await.unwrap();
    assert_eq!(
        h.engine.put_names(),
        vec![Some("a.txt".to_string()), Some("b.txt".to_string())]
    );
}

#[tokio::test]
async fn test_cancelling_running_put_settles_engine() {
    let h = Harness::new();
    *h.engine.put_mode.lock() = PutMode::Stall;
    let session = ready(&h, "opp").await;

    let ticket = session
        .put(TransferSpec::new().target_name("a.txt").buffer(vec![1; 4]))
        .await
        .unwrap();
    eventually("put to start", || h.engine.puts.lock().len() == 1).await;

    session.cancel_transfer(ticket.id).await.unwrap();
    assert!(matches!(ticket.finished().await, Err(Error::Cancelled)));
    eventually("engine settled", || {
        h.engine.settles.load(Ordering::SeqCst) == 1
    })
    .await;
    assert_eq!(h.engine.aborted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancelled_put_keeps_obex_stream_in_step() {
    let h = Harness::with_stream_engine();
    let put_seen = Gate::closed();
    let late = Gate::closed();

    let connector = h.connector.clone();
    let remote = tokio::spawn({
        let (put_seen, late) = (put_seen.clone(), late.clone());
        async move {
            let mut peer = loop {
                if let Some(peer) = connector.take_peer() {
                    break peer;
                }
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            };

            let connect = read_packet(&mut peer, 4).await;
            assert_eq!(connect.code, opcode::CONNECT);
            answer(
                &mut peer,
                Packet::new(response::SUCCESS)
                    .with_prefix(&[0x10, 0x00, 0x10, 0x00])
                    .header(Header::ConnectionId(7)),
            )
            .await;

            let put = read_packet(&mut peer, 0).await;
            assert_eq!(put.code, opcode::PUT);
            put_seen.open();

            // The reply arrives after the transfer was cancelled.
            late.wait().await;
            answer(&mut peer, Packet::new(response::CONTINUE)).await;

            let abort = read_packet(&mut peer, 0).await;
            assert_eq!(abort.code, opcode::ABORT);
            assert_eq!(abort.connection_id(), Some(7));
            answer(&mut peer, Packet::new(response::SUCCESS)).await;

            let setpath = read_packet(&mut peer, 2).await;
            assert_eq!(setpath.code, opcode::SETPATH);
            answer(&mut peer, Packet::new(response::SUCCESS)).await;
            peer
        }
    });

    let session = ready(&h, "opp").await;
    let ticket = session
        .put(TransferSpec::new().target_name("a.txt").buffer(vec![1; 8]))
        .await
        .unwrap();
    put_seen.wait().await;

    session.cancel_transfer(ticket.id).await.unwrap();
    assert!(matches!(ticket.finished().await, Err(Error::Cancelled)));
    late.open();

    session.set_path("telecom").await.unwrap();
    assert_eq!(session.snapshot().await.unwrap().state, SessionState::Ready);
    let _peer = remote.await.unwrap();
}

#[tokio::test]
async fn test_send_rejects_directories() {
    let h = Harness::new();
    let session = ready(&h, "opp").await;
    let dir = tempfile::tempdir().unwrap();

    assert!(matches!(
        session.send(dir.path(), None).await,
        Err(Error::InvalidArguments(_))
    ));
    assert!(matches!(
        session.send(dir.path().join("missing"), None).await,
        Err(Error::Io(_))
    ));
}

#[tokio::test]
async fn test_get_writes_file() {
    let h = Harness::new();
    *h.engine.get_body.lock() = b"BEGIN:VCARD\r\nEND:VCARD\r\n".to_vec();
    let session = ready(&h, "ftp").await;
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("card.vcf");

    let ticket = session
        .get(
            TransferSpec::new()
                .mime_type("x-bt/vcard")
                .target_name("1.vcf")
                .filename(&output),
        )
        .await
        .unwrap();
    let outcome = ticket.finished().await.unwrap();

    assert_eq!(outcome.buffer, b"BEGIN:VCARD\r\nEND:VCARD\r\n".to_vec());
    assert_eq!(std::fs::read(&output).unwrap(), outcome.buffer);
    let gets = h.engine.gets.lock().clone();
    assert_eq!(gets[0].mime_type.as_deref(), Some("x-bt/vcard"));
    assert_eq!(gets[0].name.as_deref(), Some("1.vcf"));
}

#[tokio::test]
async fn test_agent_rejection_promotes_next_put() {
    let h = Harness::new();
    let session = ready(&h, "opp").await;
    let path = session.register().await.unwrap();
    session.assign_agent(":1.9", "/agent").await.unwrap();
    h.agents
        .answers
        .lock()
        .push_back(Err(Error::Authorization("Rejected".to_string())));
    let first_file = temp_file(b"one");
    let second_file = temp_file(b"two");

    let first = session.send(first_file.path(), Some("one.txt")).await.unwrap();
    let second = session.send(second_file.path(), Some("two.txt")).await.unwrap();
    let first_path = format!("{}/transfer{}", path, first.id.0);
    let second_path = format!("{}/transfer{}", path, second.id.0);
    assert_eq!(first.path.as_deref(), Some(first_path.as_str()));

    match first.finished().await {
        Err(Error::Authorization(message)) => assert_eq!(message, "Rejected"),
        other => panic!("expected rejection, got {:?}", other),
    }
    second.finished().await.unwrap();
    assert_eq!(h.engine.put_names(), vec![Some("two.txt".to_string())]);

    let expected_complete = format!("complete {}", second_path);
    eventually("agent completion notice", || {
        h.agents.events().contains(&expected_complete)
    })
    .await;
    let events = h.agents.events();
    let position = |event: String| {
        events
            .iter()
            .position(|e| *e == event)
            .unwrap_or_else(|| panic!("missing agent event {:?} in {:?}", event, events))
    };
    assert_eq!(position(format!("request {}", first_path)), 0);
    assert!(position(format!("error {} Rejected", first_path)) > 0);
    assert!(position(expected_complete.clone()) > position(format!("request {}", second_path)));
}

#[tokio::test]
async fn test_agent_renames_transfer() {
    let h = Harness::new();
    let session = ready(&h, "opp").await;
    session.register().await.unwrap();
    session.assign_agent(":1.9", "/agent").await.unwrap();
    h.agents.answers.lock().push_back(Ok("chosen.txt".to_string()));

    let ticket = session
        .put(TransferSpec::new().target_name("a.txt").buffer(vec![5; 6]))
        .await
        .unwrap();
    let outcome = ticket.finished().await.unwrap();

    assert_eq!(outcome.name.as_deref(), Some("chosen.txt"));
    assert_eq!(h.engine.put_names(), vec![Some("chosen.txt".to_string())]);
}

#[tokio::test]
async fn test_unexposed_session_skips_agent() {
    let h = Harness::new();
    let session = ready(&h, "opp").await;
    session.assign_agent(":1.9", "/agent").await.unwrap();

    let ticket = session
        .put(TransferSpec::new().target_name("a").buffer(vec![1; 2]))
        .await
        .unwrap();
    assert!(ticket.path.is_none());
    ticket.finished().await.unwrap();
    assert!(h.agents.events().is_empty());
}

#[tokio::test]
async fn test_destroy_cancels_calls_and_transfers() {
    let h = Harness::new();
    let path_gate = Gate::closed();
    *h.engine.path_gate.lock() = Some(path_gate.clone());
    *h.engine.put_mode.lock() = PutMode::Stall;

    let session = ready(&h, "opp").await;
    session.register().await.unwrap();
    session.assign_agent(":1.9", "/agent").await.unwrap();

    let ticket = session
        .put(TransferSpec::new().target_name("a").buffer(vec![1; 8]))
        .await
        .unwrap();
    eventually("put to start", || h.engine.puts.lock().len() == 1).await;

    let first = tokio::spawn(session.set_path("telecom"));
    let second = tokio::spawn(session.set_path("pb"));
    eventually("both set-path calls", || h.engine.paths.lock().len() == 2).await;

    let snapshot = session.snapshot().await.unwrap();
    assert_eq!(snapshot.pending_calls, 2);
    assert_eq!(snapshot.pending_transfers, 1);

    drop(session);

    assert!(matches!(first.await.unwrap(), Err(Error::Cancelled)));
    assert!(matches!(second.await.unwrap(), Err(Error::Cancelled)));
    assert!(matches!(ticket.finished().await, Err(Error::Cancelled)));
    wait_for_sessions(&h.client, 0).await;
    eventually("engine futures to be dropped", || {
        h.engine.aborted.load(Ordering::SeqCst) == 3
    })
    .await;
    eventually("agent release", || {
        h.agents.events().last().map(String::as_str) == Some("release")
    })
    .await;

    // Nothing fires after teardown.
    path_gate.open();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let events = h.agents.events();
    assert_eq!(events.len(), 2);
    assert!(events[0].starts_with("request "));
    assert_eq!(h.driver.removes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_phonebook_folder_navigation() {
    let h = Harness::new();
    let session = ready(&h, "pbap").await;
    let mut phonebook = PhonebookAccess::new(session);
    assert_eq!(phonebook.current_folder(), "/");

    phonebook.select("/telecom/pb").await.unwrap();
    assert_eq!(phonebook.current_folder(), "/telecom/pb");

    phonebook.set_folder("", pbap::UP).await.unwrap();
    assert_eq!(phonebook.current_folder(), "/telecom");

    assert!(matches!(
        phonebook.set_folder("sim1", pbap::ENTER).await,
        Err(Error::NoSuchEntry)
    ));
    assert!(matches!(
        phonebook.set_folder("pb", 0x07).await,
        Err(Error::BadRequest)
    ));
    assert_eq!(phonebook.current_folder(), "/telecom");

    phonebook.set_folder("ich", pbap::ENTER).await.unwrap();
    assert_eq!(phonebook.current_folder(), "/telecom/ich");
    assert_eq!(
        *h.engine.paths.lock(),
        vec!["/", "/telecom/pb", "/telecom", "/telecom/ich"]
    );
}

#[tokio::test]
async fn test_phonebook_pull() {
    let h = Harness::new();
    *h.engine.get_body.lock() = b"BEGIN:VCARD\r\nFN:Alice\r\nEND:VCARD\r\n".to_vec();
    let session = ready(&h, "pbap").await;
    let phonebook = PhonebookAccess::new(session);

    let body = phonebook.pull_all("telecom/pb.vcf").await.unwrap();
    assert!(body.starts_with(b"BEGIN:VCARD"));

    let gets = h.engine.gets.lock().clone();
    assert_eq!(gets[0].mime_type.as_deref(), Some(pbap::PHONEBOOK_TYPE));
    assert_eq!(gets[0].name.as_deref(), Some("telecom/pb.vcf"));
}

#[tokio::test]
async fn test_message_access_operations() {
    let h = Harness::new();
    *h.engine.get_body.lock() = b"<folder-listing/>".to_vec();
    let session = ready(&h, "map").await;
    let messages = MessageAccess::new(session);

    assert_eq!(messages.folder_listing().await.unwrap(), "<folder-listing/>");
    messages.set_folder("telecom/msg").await.unwrap();
    messages.update_inbox().await.unwrap();

    let draft = temp_file(b"BEGIN:BMSG\r\nEND:BMSG\r\n");
    messages.push_message("outbox", draft.path()).await.unwrap();

    let puts = h.engine.puts.lock().clone();
    assert_eq!(puts[0].0.mime_type.as_deref(), Some(map::MESSAGE_UPDATE_TYPE));
    assert_eq!(puts[0].1, b"0".to_vec());
    assert_eq!(puts[1].0.mime_type.as_deref(), Some(map::MESSAGE_TYPE));
    assert_eq!(puts[1].0.name.as_deref(), Some("outbox"));
    assert_eq!(puts[1].0.app_params, Some(map::charset_params()));
    assert_eq!(puts[1].1, b"BEGIN:BMSG\r\nEND:BMSG\r\n".to_vec());

    let gets = h.engine.gets.lock().clone();
    assert_eq!(gets[0].mime_type.as_deref(), Some(map::FOLDER_LISTING_TYPE));
    assert_eq!(*h.engine.paths.lock(), vec!["telecom/msg"]);
}
