//! Demo binary driving PUBREC packets through an interceptor chain.
//!
//! Every simulated connection sends its packets concurrently; the pipeline
//! intercepts them one at a time per connection and the binary prints each
//! disposition per connection in sending order.

mod cli;

use std::{sync::Arc, time::Duration};

use clap::Parser;
use interceptor_chain::{
    ConnectionId,
    Disposition,
    ExtensionRegistry,
    InterceptorError,
    InterceptorHandle,
    PipelineConfig,
    PipelineCoordinator,
    TimeoutFallback,
    interceptor::interceptor_fn,
    packet::{PubrecPacket, PubrecReasonCode},
};

fn tagger() -> InterceptorHandle<PubrecPacket> {
    InterceptorHandle::new(
        ("demo", "tagger"),
        interceptor_fn::<PubrecPacket, _>(|input, output| {
            let seen = input.connection().to_string();
            output.with_packet(|p| p.user_properties_mut().add("seen-on", seen))??;
            Ok(())
        }),
    )
}

fn flaky(every: u16) -> InterceptorHandle<PubrecPacket> {
    InterceptorHandle::new(
        ("demo", "flaky"),
        interceptor_fn::<PubrecPacket, _>(move |input, output| {
            output.with_packet(|p| p.user_properties_mut().add("flaky", "ran"))??;
            let id = input.packet().packet_identifier();
            if every > 0 && id % every == 0 {
                return Err(InterceptorError::other(format!("flaky on packet {id}")));
            }
            Ok(())
        }),
    )
}

fn lookup(delay: Duration, timeout: Duration, fallback: TimeoutFallback) -> InterceptorHandle<PubrecPacket> {
    InterceptorHandle::new(
        ("demo", "lookup"),
        interceptor_fn::<PubrecPacket, _>(move |_, output| {
            let pending = output.async_output()?;
            pending.with_packet(|p| p.user_properties_mut().add("lookup", "started"))??;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = pending
                    .with_packet(|p| p.set_reason_string(Some("looked up".to_owned())))
                    .and_then(|_| pending.resume());
            });
            Ok(())
        }),
    )
    .asynchronous(timeout, fallback)
}

fn gate(identifier: u16) -> InterceptorHandle<PubrecPacket> {
    InterceptorHandle::new(
        ("demo", "gate"),
        interceptor_fn::<PubrecPacket, _>(move |input, output| {
            if input.packet().packet_identifier() == identifier {
                output.drop_packet()?;
            }
            Ok(())
        }),
    )
}

fn describe(packet: &PubrecPacket) -> String {
    let properties: Vec<String> = packet
        .user_properties()
        .iter()
        .map(|p| format!("{}={}", p.name(), p.value()))
        .collect();
    format!(
        "reason={:?} reason_string={:?} properties=[{}]",
        packet.reason_code(),
        packet.reason_string(),
        properties.join(", ")
    )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Applications embedding the library should install their own subscriber.
    tracing_subscriber::fmt::init();

    let cli = cli::Cli::parse();
    #[cfg(not(feature = "metrics"))]
    let _ = cli.metrics;

    #[cfg(feature = "metrics")]
    let exporter = if cli.metrics {
        Some(metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?)
    } else {
        None
    };

    let fallback = match cli.fallback {
        cli::Fallback::Continue => TimeoutFallback::Continue,
        cli::Fallback::Failure => TimeoutFallback::Failure,
    };
    let registry = Arc::new(ExtensionRegistry::<PubrecPacket>::new());
    registry.add_for_all(tagger())?;
    registry.add_for_all(flaky(cli.flaky_every))?;
    registry.add_for_all(lookup(
        Duration::from_millis(cli.async_delay_ms),
        Duration::from_millis(cli.async_timeout_ms),
        fallback,
    ))?;
    if let Some(identifier) = cli.drop_identifier {
        registry.add_for_all(gate(identifier))?;
    }

    let pipeline = Arc::new(
        PipelineCoordinator::new(Arc::clone(&registry))
            .with_config(PipelineConfig::default().max_async_timeout(Duration::from_secs(5))),
    );

    let mut tasks = Vec::new();
    for n in 1..=cli.connections {
        let connection = ConnectionId::new(n);
        registry.open_connection(connection);
        let pipeline = Arc::clone(&pipeline);
        let packets = cli.packets;
        tasks.push(tokio::spawn(async move {
            let sends = (1..=packets).map(|id| {
                let pipeline = Arc::clone(&pipeline);
                async move {
                    let packet = PubrecPacket::new(id, PubrecReasonCode::Success);
                    (id, pipeline.process(connection, packet).await)
                }
            });
            for (id, result) in futures::future::join_all(sends).await {
                match result {
                    Ok(Disposition::Send { packet, modified }) => {
                        println!("{connection} #{id}: send modified={modified} {}", describe(&packet));
                    }
                    Ok(Disposition::Drop { by }) => println!("{connection} #{id}: dropped by {by}"),
                    Err(err) => println!("{connection} #{id}: {err}"),
                }
            }
        }));
    }
    for task in tasks {
        task.await?;
    }

    #[cfg(feature = "metrics")]
    if let Some(handle) = exporter {
        handle.run_upkeep();
        print!("{}", handle.render());
    }
    Ok(())
}
