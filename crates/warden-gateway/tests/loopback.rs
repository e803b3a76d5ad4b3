//! End-to-end tests: a real back-end on a loopback port, driven through raw
//! framed connections and through the pooled client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::oneshot;

use warden_api::AppStateInner;
use warden_api::auth::{CredentialVerifier, Params, VerifierConfig};
use warden_client::{Client, ClientConfig, PoolConfig};
use warden_db::Database;
use warden_gateway::{Dispatcher, Server};
use warden_store::{Repository, RepositoryConfig};
use warden_types::{Request, RequestType, Response, ResponseCode, keys};
use warden_wire::Connection;

struct Backend {
    addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
}

impl Drop for Backend {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

async fn start_backend() -> anyhow::Result<Backend> {
    let repo = Arc::new(Repository::new(
        Database::open_in_memory()?,
        RepositoryConfig::default(),
    ));
    let config = VerifierConfig {
        params: Params::new(Params::MIN_M_COST, 1, 1, None).map_err(|e| anyhow::anyhow!("{}", e))?,
        ..VerifierConfig::default()
    };
    let verifier = CredentialVerifier::new(repo.clone(), config);
    let dispatcher = Dispatcher::new(AppStateInner::new(repo, verifier));

    let server = Server::bind("127.0.0.1:0", dispatcher).await?;
    let addr = server.local_addr()?;
    let (stop, stopped) = oneshot::channel::<()>();
    tokio::spawn(server.run(async move {
        let _ = stopped.await;
    }));

    Ok(Backend {
        addr,
        stop: Some(stop),
    })
}

async fn raw_connection(addr: SocketAddr) -> Connection<TcpStream> {
    Connection::new(TcpStream::connect(addr).await.unwrap())
}

async fn client(addr: SocketAddr) -> Client {
    let config = ClientConfig {
        addr: addr.to_string(),
        pool: PoolConfig {
            initial_size: 2,
            max_size: 4,
            max_open: None,
        },
        read_timeout: Duration::from_secs(5),
    };
    Client::connect(config).await.unwrap()
}

#[tokio::test]
async fn responses_arrive_in_request_order() {
    let backend = start_backend().await.unwrap();
    let mut conn = raw_connection(backend.addr).await;

    // Pipeline three requests before reading anything.
    conn.write_frame(&Request::new(RequestType::Logout, "R1")).await.unwrap();
    conn.write_frame(&Request::new(RequestType::Home, "R2")).await.unwrap();
    conn.write_frame(&Request::new(RequestType::GetSession, "R3")).await.unwrap();

    let r1: Response = conn.read_frame().await.unwrap();
    let r2: Response = conn.read_frame().await.unwrap();
    let r3: Response = conn.read_frame().await.unwrap();
    assert_eq!((r1.id.as_str(), r1.code), ("R1", ResponseCode::LogoutOk));
    assert_eq!((r2.id.as_str(), r2.code), ("R2", ResponseCode::HomeFailed));
    assert_eq!((r3.id.as_str(), r3.code), ("R3", ResponseCode::GetSessionFailed));
}

#[tokio::test]
async fn unknown_request_type_keeps_connection_open() {
    let backend = start_backend().await.unwrap();
    let mut stream = TcpStream::connect(backend.addr).await.unwrap();

    let body = br#"{"id":"u1","type":"TELEPORT","data":{}}"#;
    stream.write_u32(body.len() as u32).await.unwrap();
    stream.write_all(body).await.unwrap();

    let mut conn = Connection::new(stream);
    let res: Response = conn.read_frame().await.unwrap();
    assert_eq!(res.id, "u1");
    assert_eq!(res.code, ResponseCode::UnknownRequest);

    conn.write_frame(&Request::new(RequestType::Logout, "u2")).await.unwrap();
    let res: Response = conn.read_frame().await.unwrap();
    assert_eq!(res.id, "u2");
    assert_eq!(res.code, ResponseCode::LogoutOk);
}

#[tokio::test]
async fn broken_connection_does_not_affect_others() {
    let backend = start_backend().await.unwrap();
    let mut healthy = raw_connection(backend.addr).await;

    let mut broken = TcpStream::connect(backend.addr).await.unwrap();
    broken.write_u32(5).await.unwrap();
    broken.write_all(b"{{{{{").await.unwrap();

    // The back-end hangs up on the broken connection.
    let mut broken = Connection::new(broken);
    assert!(broken.read_frame::<Response>().await.is_err());

    healthy
        .write_frame(&Request::new(RequestType::Logout, "h1"))
        .await
        .unwrap();
    let res: Response = healthy.read_frame().await.unwrap();
    assert_eq!(res.id, "h1");
    assert_eq!(res.code, ResponseCode::LogoutOk);
}

#[tokio::test]
async fn account_lifecycle_through_the_client() {
    let backend = start_backend().await.unwrap();
    let client = client(backend.addr).await;

    let res = client.register("bob", "Bobby", "secret").await.unwrap();
    assert_eq!(res.code, ResponseCode::InsertOk);
    let res = client.register("bob", "Other", "secret").await.unwrap();
    assert_eq!(res.code, ResponseCode::InsertFailed);

    let res = client.login("bob", "wrong").await.unwrap();
    assert_eq!(res.code, ResponseCode::LoginFailed);

    let res = client.login("bob", "secret").await.unwrap();
    assert_eq!(res.code, ResponseCode::LoginOk);
    let sid = res.field(keys::SESSION_ID).unwrap().to_string();

    let res = client.home(&sid).await.unwrap();
    assert_eq!(res.code, ResponseCode::HomeOk);
    assert_eq!(res.field(keys::NICKNAME), Some("Bobby"));

    let res = client.edit(&sid, Some("Robert"), Some("/pics/bob.png")).await.unwrap();
    assert_eq!(res.code, ResponseCode::EditOk);

    let res = client.get_session(&sid).await.unwrap();
    assert_eq!(res.code, ResponseCode::GetSessionOk);
    assert_eq!(res.field(keys::USERNAME), Some("bob"));
    assert_eq!(res.field(keys::NICKNAME), Some("Robert"));
    assert_eq!(res.field(keys::PROFILE_PICTURE_REF), Some("/pics/bob.png"));
    assert!(res.field(keys::PASSWORD_HASH).is_none());

    let res = client.change_password(&sid, "hunter2").await.unwrap();
    assert_eq!(res.code, ResponseCode::PasswordOk);
    assert_eq!(
        client.login("bob", "secret").await.unwrap().code,
        ResponseCode::LoginFailed
    );
    assert_eq!(
        client.login("bob", "hunter2").await.unwrap().code,
        ResponseCode::LoginOk
    );

    assert_eq!(client.logout(&sid).await.unwrap().code, ResponseCode::LogoutOk);
    assert_eq!(client.home(&sid).await.unwrap().code, ResponseCode::HomeFailed);

    let stats = client.pool().stats();
    assert!(stats.reused > 0, "{}", stats);
}

#[tokio::test]
async fn concurrent_callers_get_their_own_responses() {
    let backend = start_backend().await.unwrap();
    let client = client(backend.addr).await;

    let mut tasks = Vec::new();
    for i in 0..16 {
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            let id = format!("c{}", i);
            let res = client
                .call(Request::new(RequestType::Logout, id.clone()))
                .await
                .unwrap();
            assert_eq!(res.id, id);
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    // Sixteen calls, at most four connections kept.
    assert_eq!(client.pool().stats().total, 16);
    assert!(client.pool().idle() <= 4);
}
