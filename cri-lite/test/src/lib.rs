//! End-to-end test support: a fake upstream CRI server and a proxy harness
//! wired through UNIX sockets in a tempdir.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod fake;

use std::{path::Path, sync::Arc, time::Duration};

use cri_lite_api::v1::{
    image_service_client::ImageServiceClient, image_service_server::ImageServiceServer,
    runtime_service_client::RuntimeServiceClient, runtime_service_server::RuntimeServiceServer,
};
use cri_lite_core::{ContainerLookup, Policy};
use cri_lite_grpc::{channel, CriProxy, RuntimeLookup};
use fake::FakeCri;
use tokio::net::{UnixListener, UnixStream};
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::{Channel, Server};

/// A fake upstream serving on a socket in a fresh tempdir.
pub struct Upstream {
    pub fake: FakeCri,
    pub channel: Channel,
    dir: tempfile::TempDir,
    _shutdown: drain::Signal,
}

impl Upstream {
    pub async fn spawn(fake: FakeCri) -> Self {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let socket = dir.path().join("upstream.sock");
        let listener = UnixListener::bind(&socket).expect("failed to bind upstream socket");
        let (shutdown, watch) = drain::channel();

        let server = fake.clone();
        tokio::spawn(async move {
            use futures::FutureExt;
            Server::builder()
                .add_service(RuntimeServiceServer::new(server.clone()))
                .add_service(ImageServiceServer::new(server))
                .serve_with_incoming_shutdown(
                    UnixListenerStream::new(listener),
                    watch.signaled().map(|_| ()),
                )
                .await
                .expect("fake CRI server failed");
        });

        let channel = channel(&format!("unix://{}", socket.display()), Duration::from_secs(5))
            .expect("failed to build upstream channel");

        Self {
            fake,
            channel,
            dir,
            _shutdown: shutdown,
        }
    }

    /// Container lookups over the upstream channel, as the supervisor wires
    /// them for PodScoped listeners.
    pub fn lookup(&self) -> Arc<dyn ContainerLookup> {
        Arc::new(RuntimeLookup::new(self.channel.clone()))
    }

    /// Serves a proxy bound to `policy` on a second socket in the same
    /// tempdir and connects clients through it.
    pub async fn proxy(self, policy: Option<Arc<dyn Policy>>) -> Proxy {
        let socket = self.dir.path().join("proxy.sock");
        let proxy = CriProxy::new(self.channel.clone(), self.channel.clone(), policy);
        let (shutdown, watch) = drain::channel();

        let serve_socket = socket.clone();
        tokio::spawn(async move {
            proxy
                .serve(serve_socket, watch)
                .await
                .expect("proxy server failed");
        });
        await_socket(&socket).await;

        let channel = channel(&format!("unix://{}", socket.display()), Duration::from_secs(5))
            .expect("failed to build proxy channel");

        Proxy {
            fake: self.fake.clone(),
            runtime: RuntimeServiceClient::new(channel.clone()),
            image: ImageServiceClient::new(channel),
            _upstream: self,
            _shutdown: shutdown,
        }
    }
}

/// Clients speaking to a running proxy, plus the fake behind it.
pub struct Proxy {
    pub fake: FakeCri,
    pub runtime: RuntimeServiceClient<Channel>,
    pub image: ImageServiceClient<Channel>,
    _upstream: Upstream,
    _shutdown: drain::Signal,
}

async fn await_socket(path: &Path) {
    for _ in 0..100 {
        if UnixStream::connect(path).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("socket {} never became ready", path.display());
}

pub fn init_tracing() -> tracing::subscriber::DefaultGuard {
    tracing::subscriber::set_default(
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "cri_lite=debug,info".parse().unwrap()),
            )
            .finish(),
    )
}
