use std::{hint::black_box, sync::Arc};

use bytes::{Bytes, BytesMut};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use tokio::runtime::Runtime;
use zprobe::{
    service::ACK_TIMEOUT, transport::resp::frame, Broker, LocalConnector, PatternSubscription,
    ServiceInstance, Transport,
};

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

/// Подписывает `n` клиентов на `pattern` и вычитывает их потоки в фоне.
fn subscribe_clients(
    rt: &Runtime,
    broker: &Arc<Broker>,
    pattern: &str,
    n: usize,
) -> Vec<Arc<dyn Transport>> {
    rt.block_on(async {
        let mut clients = Vec::with_capacity(n);
        for _ in 0..n {
            let client: Arc<dyn Transport> = Arc::new(broker.connect());
            let mut stream = client.subscribe(pattern).await.unwrap();
            tokio::spawn(async move { while stream.recv().await.is_some() {} });
            clients.push(client);
        }
        clients
    })
}

fn bench_publish_exact(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("publish_exact");

    for n in [0usize, 1, 10, 100] {
        let broker = Arc::new(Broker::new());
        let _clients = subscribe_clients(&rt, &broker, "chan", n);

        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| black_box(broker.publish("chan", Bytes::from_static(b"x"))))
        });
    }
    group.finish();
}

fn bench_publish_pattern(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("publish_pattern");

    for n in [1usize, 10, 100] {
        let broker = Arc::new(Broker::new());
        let _clients = subscribe_clients(&rt, &broker, "topic/*", n);

        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| black_box(broker.publish("topic/orders/new", Bytes::from_static(b"x"))))
        });
    }
    group.finish();
}

/// Полный цикл запрос/подтверждение через брокер внутри процесса.
fn bench_handshake_round_trip(c: &mut Criterion) {
    let rt = runtime();
    let broker = Arc::new(Broker::new());

    let (publisher, _responder) = rt.block_on(async {
        let connector = Arc::new(LocalConnector::new(broker.clone()));
        let mut publisher = ServiceInstance::new(0, connector.clone(), ACK_TIMEOUT);
        publisher.setup().await.unwrap();
        let mut responder = ServiceInstance::new(1, connector, ACK_TIMEOUT);
        responder.setup().await.unwrap();
        responder
            .subscribe(PatternSubscription::new("bench/*").with_handshake(true))
            .await
            .unwrap();
        (publisher, responder)
    });

    c.bench_function("handshake_round_trip", |b| {
        b.to_async(&rt).iter(|| async {
            let value = publisher
                .publish_with_ack("bench", Bytes::from_static(b"ping"))
                .await
                .unwrap();
            black_box(value)
        })
    });
}

fn bench_resp_framing(c: &mut Criterion) {
    let mut group = c.benchmark_group("resp");

    group.bench_function("encode_publish", |b| {
        b.iter(|| black_box(frame::encode_command(["PUBLISH", "topic/orders/new", "payload"])))
    });

    let pmessage = b"*4\r\n$8\r\npmessage\r\n$7\r\ntopic/*\r\n$16\r\ntopic/orders/new\r\n$7\r\npayload\r\n";
    group.bench_function("decode_pmessage", |b| {
        b.iter(|| {
            let mut buf = BytesMut::from(&pmessage[..]);
            black_box(frame::decode(&mut buf).unwrap())
        })
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_publish_exact,
    bench_publish_pattern,
    bench_handshake_round_trip,
    bench_resp_framing
);
criterion_main!(benches);
