use anyhow::Result;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use docbase_server::{config::Config, server::Server, store};
use tokio::runtime::Runtime;

async fn start_server() -> Result<Server> {
    let mut config = Config::load("./config.dev.toml").await?;
    config.http.port = 0;
    Server::spawn(config, store::in_memory()).await
}

fn benchmark_document_writes(c: &mut Criterion) {
    let mut group = c.benchmark_group("document_writes");
    group.sample_size(10);
    for iters in [10_u64, 100_u64, 250_u64, 1000_u64].iter() {
        group.throughput(Throughput::Elements(*iters));
        group.bench_with_input(BenchmarkId::from_parameter(iters), iters, |b, &iters| {
            b.iter(|| {
                let rt = Runtime::new().unwrap();
                rt.block_on(async move {
                    let server = start_server().await.unwrap();
                    let base = format!("http://{}/api/v1/bench", server.http_addr());
                    let client = reqwest::Client::new();
                    client
                        .post(format!("{base}/0"))
                        .send()
                        .await
                        .unwrap()
                        .error_for_status()
                        .unwrap();

                    let start = std::time::Instant::now();
                    for i in 0..iters {
                        client
                            .put(format!("{base}/1/doc-{}", i % 16))
                            .body(format!("revision {i}"))
                            .send()
                            .await
                            .unwrap()
                            .error_for_status()
                            .unwrap();
                    }
                    let duration = start.elapsed();

                    server.shutdown().await.unwrap();

                    duration
                })
            });
        });
    }
}

criterion_group!(benches, benchmark_document_writes);
criterion_main!(benches);
