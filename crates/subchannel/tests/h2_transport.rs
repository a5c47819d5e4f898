// -------------------------------------------------------------------------------------------------
//  Copyright (C) 2015-2025 Nautech Systems Pty Ltd. All rights reserved.
//  https://nautechsystems.io
//
//  Licensed under the GNU Lesser General Public License Version 3.0 (the "License");
//  You may not use this file except in compliance with the License.
//  You may obtain a copy of the License at https://www.gnu.org/licenses/lgpl-3.0.en.html
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.
// -------------------------------------------------------------------------------------------------

//! End-to-end tests of a subchannel over the `h2` transport against a loopback server.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use h2::Reason;
use http::HeaderMap;
use nautilus_subchannel::{
    ChannelCredentials, ConnectivityState, H2Transport, Subchannel, SubchannelCall,
    SubchannelConfig,
    subchannel::{DisconnectListener, StateListener},
    testing::{init_logger_for_testing, wait_until_async},
    transport::h2::H2Stream,
};
use rstest::rstest;
use tokio::{
    net::TcpListener,
    sync::{mpsc, oneshot},
};

const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct RecordingCall {
    stream: Option<H2Stream>,
}

impl SubchannelCall<H2Transport> for RecordingCall {
    fn host(&self) -> &str {
        "localhost"
    }

    fn method(&self) -> &str {
        "/echo.Echo/Ping"
    }

    fn attach_stream(&mut self, stream: H2Stream, _subchannel: Subchannel<H2Transport>) {
        self.stream = Some(stream);
    }
}

fn create_subchannel(address: &str) -> Subchannel<H2Transport> {
    Subchannel::new(
        format!("dns:///{address}"),
        address,
        SubchannelConfig::default(),
        ChannelCredentials::insecure(),
        H2Transport::new(),
    )
}

async fn wait_for_state(subchannel: &Subchannel<H2Transport>, state: ConnectivityState) {
    wait_until_async(
        || {
            let subchannel = subchannel.clone();
            async move { subchannel.connectivity_state() == state }
        },
        TIMEOUT,
    )
    .await;
}

/// Accepts one connection, answering every request with `200` and reporting its head,
/// until told to close.
async fn serve_until_closed(
    listener: TcpListener,
    requests_tx: mpsc::UnboundedSender<http::request::Parts>,
    mut close_rx: oneshot::Receiver<()>,
) {
    let (socket, _) = listener.accept().await.unwrap();
    let mut connection = h2::server::handshake(socket).await.unwrap();

    loop {
        tokio::select! {
            next = connection.accept() => match next {
                Some(Ok((request, mut respond))) => {
                    let (parts, _body) = request.into_parts();
                    let _ = requests_tx.send(parts);
                    let response = http::Response::builder().status(200).body(()).unwrap();
                    let _ = respond.send_response(response, true);
                }
                _ => break,
            },
            _ = &mut close_rx => break,
        }
    }
}

#[rstest]
#[tokio::test]
async fn test_connects_starts_call_and_reports_disconnect() {
    init_logger_for_testing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let (requests_tx, mut requests_rx) = mpsc::unbounded_channel();
    let (close_tx, close_rx) = oneshot::channel();
    let server = tokio::spawn(serve_until_closed(listener, requests_tx, close_rx));

    let subchannel = create_subchannel(&address);
    let disconnects = Arc::new(AtomicUsize::new(0));
    let disconnects_clone = disconnects.clone();
    let listener: Arc<DisconnectListener> = Arc::new(move || {
        disconnects_clone.fetch_add(1, Ordering::SeqCst);
    });
    subchannel.add_disconnect_listener(listener);

    subchannel.start_connecting();
    wait_for_state(&subchannel, ConnectivityState::Ready).await;

    let mut metadata = HeaderMap::new();
    metadata.insert("x-trace-id", "abc123".parse().unwrap());
    let mut call = RecordingCall::default();
    subchannel.start_call_stream(&metadata, &mut call).unwrap();

    let request = tokio::time::timeout(TIMEOUT, requests_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(request.method, http::Method::POST);
    assert_eq!(request.uri.path(), "/echo.Echo/Ping");
    assert_eq!(request.uri.authority().unwrap().as_str(), "localhost");
    assert_eq!(request.headers["content-type"], "application/grpc");
    assert_eq!(request.headers["te"], "trailers");
    assert_eq!(request.headers["x-trace-id"], "abc123");
    assert_eq!(
        request.headers["user-agent"].to_str().unwrap(),
        subchannel.user_agent()
    );

    let response = tokio::time::timeout(TIMEOUT, call.stream.unwrap().response)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.status(), http::StatusCode::OK);

    close_tx.send(()).unwrap();
    server.await.unwrap();

    wait_for_state(&subchannel, ConnectivityState::Idle).await;
    wait_until_async(
        || {
            let disconnects = disconnects.clone();
            async move { disconnects.load(Ordering::SeqCst) == 1 }
        },
        TIMEOUT,
    )
    .await;
    assert!(!subchannel.has_session());
}

#[rstest]
#[tokio::test]
async fn test_refused_connection_enters_transient_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);

    let subchannel = create_subchannel(&address);
    let transitions = Arc::new(Mutex::new(Vec::new()));
    let transitions_clone = transitions.clone();
    let state_listener: Arc<StateListener<H2Transport>> = Arc::new(
        move |_: &Subchannel<H2Transport>, previous: ConnectivityState, new: ConnectivityState| {
            transitions_clone.lock().unwrap().push((previous, new));
        },
    );
    subchannel.add_connectivity_state_listener(state_listener);

    subchannel.start_connecting();

    wait_until_async(
        || {
            let transitions = transitions.clone();
            async move {
                transitions.lock().unwrap().contains(&(
                    ConnectivityState::Connecting,
                    ConnectivityState::TransientFailure,
                ))
            }
        },
        TIMEOUT,
    )
    .await;
    assert!(!subchannel.has_session());
}

#[rstest]
#[tokio::test]
async fn test_server_go_away_returns_to_idle() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let (go_away_tx, go_away_rx) = oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut connection = h2::server::handshake(socket).await.unwrap();
        let _ = go_away_rx.await;

        connection.abrupt_shutdown(Reason::ENHANCE_YOUR_CALM);
        while let Some(Ok(_)) = connection.accept().await {}
    });

    let subchannel = create_subchannel(&address);
    subchannel.start_connecting();
    wait_for_state(&subchannel, ConnectivityState::Ready).await;

    go_away_tx.send(()).unwrap();
    wait_for_state(&subchannel, ConnectivityState::Idle).await;
    assert!(!subchannel.has_session());

    server.await.unwrap();
}
