//! 线上传输的端到端契约测试。
//!
//! # 教案式说明
//! - **Why**：进程内传输共享同一个上下文，取消与截止时间“天然”可见；
//!   线上传输必须靠帧把同样的语义搬过连接，这里逐条验证搬运没有走样；
//! - **How**：在回环地址上启动真实的 [`Server`]，客户端通过 [`Connection`] 发起四种形态的调用；
//!   TLS 用例借助 `rcgen` 生成自签名证书；
//! - **What**：断言失败时 panic，并附带中文上下文说明违反了哪条契约。

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::stream;
use spark_rpc::{
    CallContext, ChannelError, Client, Code, Method, Pattern, Router, ServiceTable, Status,
    StatusKind,
};
use spark_rpc_transport::{
    ConnectOptions, Connection, Server, ServerConfig, ServerState, TlsAcceptor, TlsConnector,
    client_config_from_pem, server_config_from_pem,
};
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const ECHO: Method<String, String> = Method::new("wire.Echo/Echo", Pattern::Unary);
const REJECT: Method<i64, i64> = Method::new("wire.Echo/Reject", Pattern::Unary);
const COUNT: Method<u32, u32> = Method::new("wire.Echo/Count", Pattern::ServerStreaming);
const TICKS: Method<u32, u32> = Method::new("wire.Echo/Ticks", Pattern::ServerStreaming);
const TOTAL: Method<u64, u64> = Method::new("wire.Echo/Total", Pattern::ClientStreaming);
const CHAT: Method<String, String> = Method::new("wire.Echo/Chat", Pattern::BidiStreaming);
const SLOW: Method<u64, u64> = Method::new("wire.Echo/Slow", Pattern::Unary);
const BLOAT: Method<usize, String> = Method::new("wire.Echo/Bloat", Pattern::Unary);
const FIRST_ONLY: Method<String, String> =
    Method::new("wire.Echo/FirstOnly", Pattern::BidiStreaming);

fn router(produced: Arc<AtomicUsize>) -> Router {
    let table = ServiceTable::new()
        .unary(ECHO, |_ctx, name: String| async move { Ok(format!("echo {name}")) })
        .unary(REJECT, |_ctx, value: i64| async move {
            Err::<i64, _>(Status::invalid_argument(format!("rejected {value}")))
        })
        .server_streaming(COUNT, |_ctx, upto: u32, mut sink| async move {
            for value in 1..=upto {
                sink.send(value).await?;
            }
            Ok(())
        })
        .server_streaming(TICKS, move |_ctx, _start: u32, mut sink| {
            let produced = Arc::clone(&produced);
            async move {
                for value in 0u32.. {
                    sink.send(value).await?;
                    produced.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                Ok(())
            }
        })
        .client_streaming(TOTAL, |_ctx, mut requests| async move {
            let mut total = 0u64;
            while let Some(value) = requests.message().await? {
                total += value;
            }
            Ok(total)
        })
        .bidi_streaming(CHAT, |_ctx, mut requests, mut sink| async move {
            while let Some(line) = requests.message().await? {
                sink.send(format!("re: {line}")).await?;
            }
            Ok(())
        })
        .unary(SLOW, |_ctx, millis: u64| async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok(millis)
        })
        .unary(BLOAT, |_ctx, len: usize| async move { Ok("x".repeat(len)) })
        .bidi_streaming(FIRST_ONLY, |_ctx, mut requests, mut sink| async move {
            let first = requests.message().await?.unwrap_or_default();
            requests.close()?;
            sink.send(format!("re: {first}")).await?;
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(())
        });
    Router::new().add_service(table)
}

struct Running {
    addr: SocketAddr,
    server: Arc<Server>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl Running {
    async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.task.await.expect("服务器任务不应 panic");
    }
}

async fn start(server: Server) -> Running {
    let listener = Server::bind("127.0.0.1:0".parse().expect("解析回环地址"))
        .await
        .expect("绑定本地端口");
    let addr = listener.local_addr().expect("读取监听地址");
    let server = Arc::new(server);
    let (shutdown, signal) = oneshot::channel::<()>();
    let task = tokio::spawn({
        let server = Arc::clone(&server);
        async move {
            server
                .serve_with_shutdown(listener, async move {
                    let _ = signal.await;
                })
                .await;
        }
    });
    Running {
        addr,
        server,
        shutdown: Some(shutdown),
        task,
    }
}

async fn plain_client(addr: SocketAddr) -> Client {
    let connection = Connection::connect(addr, ConnectOptions::new())
        .await
        .expect("建立 TCP 连接");
    Client::new(connection)
}

/// 四种交互形态在 TCP 上与进程内传输表现一致。
#[tokio::test(flavor = "multi_thread")]
async fn all_patterns_round_trip_over_tcp() {
    let running = start(Server::new(
        router(Arc::new(AtomicUsize::new(0))),
        ServerConfig::new(),
    ))
    .await;
    let client = plain_client(running.addr).await;

    let reply = client
        .unary(ECHO, CallContext::default(), "wire".to_owned())
        .await
        .expect("一元调用应成功");
    assert_eq!(reply, "echo wire");

    let values = client
        .server_streaming(COUNT, CallContext::default(), 5)
        .await
        .expect("建立服务端流应成功")
        .collect()
        .await
        .expect("服务端流应以 OK 结束");
    assert_eq!(values, vec![1, 2, 3, 4, 5]);

    let total = client
        .client_streaming(TOTAL, CallContext::default(), stream::iter(1..=100u64))
        .await
        .expect("客户端流应成功");
    assert_eq!(total, 5050);

    let mut call = client
        .bidi_streaming(CHAT, CallContext::default())
        .await
        .expect("建立双向流应成功");
    for line in ["a", "b"] {
        call.requests.send(line.to_owned()).await.expect("发送应成功");
        let reply = call.responses.message().await.expect("接收应成功");
        assert_eq!(reply, Some(format!("re: {line}")));
    }
    call.requests.close().expect("首次半关闭应成功");
    assert_eq!(call.responses.message().await, Ok(None));

    running.stop().await;
}

/// 应用错误与未知方法的状态码、文案跨连接保持不变，且不会被误判为传输错误。
#[tokio::test(flavor = "multi_thread")]
async fn statuses_survive_the_wire() {
    let running = start(Server::new(
        router(Arc::new(AtomicUsize::new(0))),
        ServerConfig::new(),
    ))
    .await;
    let client = plain_client(running.addr).await;

    let err = client
        .unary(REJECT, CallContext::default(), 7)
        .await
        .expect_err("拒绝输入必须失败");
    assert_eq!(err.code(), Code::InvalidArgument);
    assert_eq!(err.message(), "rejected 7");
    assert_eq!(err.kind(), StatusKind::Application);

    const MISSING: Method<String, String> = Method::new("wire.Echo/Missing", Pattern::Unary);
    let err = client
        .unary(MISSING, CallContext::default(), String::new())
        .await
        .expect_err("未知方法必须失败");
    assert_eq!(err.code(), Code::Unimplemented);

    running.stop().await;
}

/// TLS 握手完成后调用语义与明文连接一致。
#[tokio::test(flavor = "multi_thread")]
async fn calls_succeed_over_tls() {
    let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_owned()])
        .expect("生成自签名证书");
    let cert_pem = generated.cert.pem();
    let key_pem = generated.key_pair.serialize_pem();

    let server_config = server_config_from_pem(cert_pem.as_bytes(), key_pem.as_bytes())
        .expect("装载服务端证书");
    let server = Server::new(router(Arc::new(AtomicUsize::new(0))), ServerConfig::new())
        .with_tls(TlsAcceptor::new(server_config));
    let running = start(server).await;

    let client_config = client_config_from_pem(cert_pem.as_bytes()).expect("装载受信任证书");
    let connector = TlsConnector::new(client_config, "localhost").expect("解析服务器名");
    let connection = Connection::connect(running.addr, ConnectOptions::new().with_tls(connector))
        .await
        .expect("建立 TLS 连接");
    let client = Client::new(connection);

    let reply = client
        .unary(ECHO, CallContext::default(), "secure".to_owned())
        .await
        .expect("TLS 上的一元调用应成功");
    assert_eq!(reply, "echo secure");

    let values = client
        .server_streaming(COUNT, CallContext::default(), 3)
        .await
        .expect("建立服务端流应成功")
        .collect()
        .await
        .expect("服务端流应以 OK 结束");
    assert_eq!(values, vec![1, 2, 3]);

    running.stop().await;
}

/// 截止时间随 `Open` 帧传递，慢处理器在被调方同样被终止。
#[tokio::test(flavor = "multi_thread")]
async fn deadline_propagates_over_the_wire() {
    let running = start(Server::new(
        router(Arc::new(AtomicUsize::new(0))),
        ServerConfig::new(),
    ))
    .await;
    let client = plain_client(running.addr).await;

    let ctx = CallContext::builder()
        .with_timeout(Duration::from_millis(300))
        .build();
    let err = client
        .unary(SLOW, ctx, 3_000)
        .await
        .expect_err("超过截止时间必须失败");
    assert_eq!(err.code(), Code::DeadlineExceeded);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(running.server.active_calls(), 0, "被调方应已结束超时调用");

    running.stop().await;
}

/// 调用方取消以 `Cancel` 帧传到被调方，生产者随之停止。
#[tokio::test(flavor = "multi_thread")]
async fn cancellation_stops_remote_producer() {
    let produced = Arc::new(AtomicUsize::new(0));
    let running = start(Server::new(router(Arc::clone(&produced)), ServerConfig::new())).await;
    let client = plain_client(running.addr).await;

    let ctx = CallContext::default();
    let mut responses = client
        .server_streaming(TICKS, ctx.clone(), 0)
        .await
        .expect("建立服务端流应成功");
    for expected in 0..3u32 {
        assert_eq!(
            responses.message().await.expect("取消前读取应成功"),
            Some(expected)
        );
    }
    ctx.cancel();
    let err = responses.message().await.expect_err("取消后读取必须失败");
    assert_eq!(err.code(), Code::Canceled);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let after_cancel = produced.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        produced.load(Ordering::SeqCst),
        after_cancel,
        "取消传到被调方后生产者不应继续发送"
    );
    assert_eq!(running.server.active_calls(), 0);

    running.stop().await;
}

/// 排空期间拒绝新调用，进行中的调用照常完成。
#[tokio::test(flavor = "multi_thread")]
async fn draining_rejects_new_calls_and_finishes_in_flight() {
    let running = start(Server::new(
        router(Arc::new(AtomicUsize::new(0))),
        ServerConfig::new().with_drain_timeout(Duration::from_secs(5)),
    ))
    .await;
    let client = plain_client(running.addr).await;
    let mut state = running.server.subscribe();

    let in_flight = tokio::spawn({
        let client = client.clone();
        async move { client.unary(SLOW, CallContext::default(), 500).await }
    });
    while running.server.active_calls() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let Running {
        server,
        mut shutdown,
        task,
        ..
    } = running;
    if let Some(shutdown) = shutdown.take() {
        let _ = shutdown.send(());
    }
    state
        .wait_for(|state| *state == ServerState::Draining)
        .await
        .expect("服务器应进入排空状态");

    let err = client
        .unary(ECHO, CallContext::default(), "late".to_owned())
        .await
        .expect_err("排空期间的新调用必须被拒绝");
    assert_eq!(err.code(), Code::Unavailable);

    let reply = in_flight
        .await
        .expect("调用任务不应 panic")
        .expect("进行中的调用应照常完成");
    assert_eq!(reply, 500);

    task.await.expect("服务器任务不应 panic");
    assert_eq!(server.state(), ServerState::Stopped);
}

/// 连接中途断开时，进行中的调用以传输层错误结束。
#[tokio::test(flavor = "multi_thread")]
async fn connection_loss_is_a_transport_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("绑定本地端口");
    let addr = listener.local_addr().expect("读取监听地址");
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("接受连接");
        let mut buf = [0u8; 64];
        let _ = socket.read(&mut buf).await;
    });

    let client = plain_client(addr).await;
    let err = client
        .unary(ECHO, CallContext::default(), "lost".to_owned())
        .await
        .expect_err("连接断开必须失败");
    assert_eq!(err.kind(), StatusKind::Transport);
    assert!(err.is_transport());
}

/// 超过帧长上限的消息只终结所属调用：请求超限在调用方本地拒绝，响应超限由被调方以 `Internal` 结束，
/// 同一连接上的双向流照常收发。
#[tokio::test(flavor = "multi_thread")]
async fn oversized_messages_fail_only_their_own_call() {
    let running = start(Server::new(
        router(Arc::new(AtomicUsize::new(0))),
        ServerConfig::new().with_max_frame_len(1024),
    ))
    .await;
    let connection = Connection::connect(
        running.addr,
        ConnectOptions::new().with_max_frame_len(1024),
    )
    .await
    .expect("建立 TCP 连接");
    let client = Client::new(connection.clone());

    let mut sibling = client
        .bidi_streaming(CHAT, CallContext::default())
        .await
        .expect("建立双向流应成功");
    sibling.requests.send("a".to_owned()).await.expect("发送应成功");
    assert_eq!(
        sibling.responses.message().await,
        Ok(Some("re: a".to_owned()))
    );

    let err = client
        .unary(ECHO, CallContext::default(), "y".repeat(4096))
        .await
        .expect_err("超限请求必须失败");
    assert_eq!(err.code(), Code::InvalidArgument);
    assert_eq!(err.kind(), StatusKind::Application);

    let err = client
        .unary(BLOAT, CallContext::default(), 4096)
        .await
        .expect_err("超限响应必须失败");
    assert_eq!(err.code(), Code::Internal);
    assert_eq!(err.kind(), StatusKind::Application);

    sibling.requests.send("b".to_owned()).await.expect("相邻调用应不受影响");
    assert_eq!(
        sibling.responses.message().await,
        Ok(Some("re: b".to_owned()))
    );
    sibling.requests.close().expect("首次半关闭应成功");
    assert_eq!(sibling.responses.message().await, Ok(None));
    assert!(!connection.is_closed(), "连接应保持可用");

    let reply = client
        .unary(ECHO, CallContext::default(), "still here".to_owned())
        .await
        .expect("连接上的新调用应成功");
    assert_eq!(reply, "echo still here");

    running.stop().await;
}

/// 对端判定连接损坏时，同一连接上的全部调用以传输层错误结束，而不是被报告为取消。
#[tokio::test(flavor = "multi_thread")]
async fn corrupted_connection_fails_every_call_as_transport_error() {
    let running = start(Server::new(
        router(Arc::new(AtomicUsize::new(0))),
        ServerConfig::new().with_max_frame_len(1024),
    ))
    .await;
    // 调用方的上限更宽松，超限帧因此会真正上线并被服务端拒收。
    let connection = Connection::connect(running.addr, ConnectOptions::new())
        .await
        .expect("建立 TCP 连接");
    let client = Client::new(connection.clone());

    let mut sibling = client
        .bidi_streaming(CHAT, CallContext::default())
        .await
        .expect("建立双向流应成功");
    sibling.requests.send("a".to_owned()).await.expect("发送应成功");
    assert_eq!(
        sibling.responses.message().await,
        Ok(Some("re: a".to_owned()))
    );

    let err = client
        .unary(ECHO, CallContext::default(), "y".repeat(4096))
        .await
        .expect_err("连接被拒收后调用必须失败");
    assert_eq!(err.kind(), StatusKind::Transport);

    let err = sibling
        .responses
        .message()
        .await
        .expect_err("相邻调用必须随连接一同失败");
    assert_eq!(err.kind(), StatusKind::Transport);
    assert!(err.is_transport());

    for _ in 0..50 {
        if connection.is_closed() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(connection.is_closed());

    running.stop().await;
}

/// 被调方关闭请求接收端后，关闭经 `HalfClose` 帧回传，调用方随后的发送得到 `ChannelClosed`。
#[tokio::test(flavor = "multi_thread")]
async fn callee_closing_requests_reaches_the_remote_sender() {
    let running = start(Server::new(
        router(Arc::new(AtomicUsize::new(0))),
        ServerConfig::new(),
    ))
    .await;
    let client = plain_client(running.addr).await;

    let mut call = client
        .bidi_streaming(FIRST_ONLY, CallContext::default())
        .await
        .expect("建立双向流应成功");
    call.requests.send("a".to_owned()).await.expect("首条请求应成功");
    assert_eq!(
        call.responses.message().await,
        Ok(Some("re: a".to_owned()))
    );

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(call.requests.is_closed(), "被调方的关闭应已传到调用方");
    assert!(matches!(
        call.requests.send("b".to_owned()).await,
        Err(ChannelError::ChannelClosed { .. })
    ));

    assert_eq!(
        call.responses.message().await,
        Ok(None),
        "响应方向不受请求方向关闭影响，调用照常以 OK 结束"
    );

    running.stop().await;
}
