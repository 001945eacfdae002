//! Full games against a local host, three scripted clients per table.
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{anyhow, Result};
use dicetable::client::connection::{LinkState, POLICY};
use dicetable::config::{ClientConfig, HostConfig, LocalPlayer, Timings};
use dicetable::core::gate::InputState;
use dicetable::core::protocol::{Money, TableStatus};
use dicetable::core::reducer::Notice;
use dicetable::core::session::RoomCode;
use dicetable::host::server::TableHost;
use dicetable::{Scene, SessionSummary, TableRenderer, TableSession, UiCommand};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const PATIENCE: Duration = Duration::from_secs(20);

/// Forwards every scene to the test
struct Recorder(mpsc::UnboundedSender<Scene>);

impl TableRenderer for Recorder {
    fn render(&mut self, scene: &Scene) -> Result<()> {
        let _ = self.0.send(scene.clone());
        Ok(())
    }
}

fn fast() -> Timings {
    Timings {
        reconnect_delay: Duration::from_millis(100),
        prize_display: Duration::from_millis(200),
        input_fallback: Duration::from_secs(2),
        dice_dwell: Duration::from_millis(10),
        round_dwell: Duration::from_millis(10),
        tie_dwell: Duration::from_millis(10),
        frame: Duration::from_millis(50),
        ..Timings::default()
    }
}

async fn start_host(lives: u8) -> Result<SocketAddr> {
    let host = TableHost::bind(HostConfig {
        addr: "127.0.0.1:0".parse()?,
        stake: Money::from_units(100),
        lives,
        spin_duration: Duration::from_millis(200),
    })
    .await?;
    let addr = host.local_addr()?;
    tokio::spawn(host.run());
    Ok(addr)
}

struct Client {
    commands: mpsc::Sender<UiCommand>,
    scenes: mpsc::UnboundedReceiver<Scene>,
    task: JoinHandle<Result<SessionSummary>>,
}

fn join(addr: SocketAddr, room: &str, id: u64, name: &str) -> Result<Client> {
    join_with(addr, room, id, name, fast())
}

fn join_with(
    addr: SocketAddr,
    room: &str,
    id: u64,
    name: &str,
    timings: Timings,
) -> Result<Client> {
    let config = ClientConfig {
        origin: format!("http://{addr}"),
        room: RoomCode::parse(room)?,
        local: LocalPlayer { id, name: name.to_string() },
        timings,
    };
    let (scene_tx, scenes) = mpsc::unbounded_channel();
    let (commands, command_rx) = mpsc::channel(16);
    let session = TableSession::new(&config, Recorder(scene_tx))?;
    let task = tokio::spawn(session.run(command_rx));
    Ok(Client { commands, scenes, task })
}

async fn wait_for(
    scenes: &mut mpsc::UnboundedReceiver<Scene>,
    what: impl Fn(&Scene) -> bool,
) -> Result<Scene> {
    timeout(PATIENCE, async {
        while let Some(scene) = scenes.recv().await {
            if what(&scene) {
                return Ok(scene);
            }
        }
        Err(anyhow!("session ended early"))
    })
    .await?
}

/// Rolls once per round until the game is over, then quits
async fn autoplay(mut client: Client) -> Result<SessionSummary> {
    let mut round = 0;
    let mut rolled = false;
    timeout(PATIENCE, async {
        while let Some(scene) = client.scenes.recv().await {
            if scene.session.outcome.is_some() {
                break;
            }
            if scene.session.round != round {
                round = scene.session.round;
                rolled = false;
            }
            if matches!(scene.notice, Some(Notice::Tie { .. })) {
                rolled = false;
                client.commands.send(UiCommand::Dismiss).await?;
            }
            if !rolled && scene.input == InputState::Ready {
                rolled = true;
                client.commands.send(UiCommand::Roll).await?;
            }
        }
        Ok::<_, anyhow::Error>(())
    })
    .await??;

    client.commands.send(UiCommand::Quit).await?;
    client.task.await?
}

#[tokio::test]
async fn test_three_players_play_to_a_single_winner() -> Result<()> {
    let addr = start_host(2).await?;
    let clients = [(1, "ana"), (2, "bea"), (3, "cruz")]
        .into_iter()
        .map(|(id, name)| join(addr, "FULL1", id, name))
        .collect::<Result<Vec<_>>>()?;

    let games: Vec<_> = clients.into_iter().map(|c| tokio::spawn(autoplay(c))).collect();
    let mut summaries = Vec::new();
    for game in games {
        summaries.push(game.await??);
    }

    let winners: Vec<_> = summaries
        .iter()
        .map(|s| s.session.outcome.as_ref().and_then(|o| o.winner.clone()))
        .collect();
    assert!(winners[0].is_some());
    assert!(winners.iter().all(|w| *w == winners[0]));

    let table = &summaries[0].session;
    assert_eq!(table.status, TableStatus::Finished);
    assert_eq!(table.active_players().count(), 1);
    assert_eq!(table.active_players().next().map(|p| p.name.clone()), winners[0]);
    // 3 seats at 100 each, times the drawn multiplier
    let factor = i64::from(table.multiplier.as_ref().and_then(|m| m.factor()).unwrap_or(0));
    assert_eq!(table.final_prize, Some(Money::from_units(300 * factor)));
    Ok(())
}

#[tokio::test]
async fn test_prize_is_revealed_before_play() -> Result<()> {
    let addr = start_host(3).await?;
    let mut ana = join(addr, "SPIN1", 1, "ana")?;
    let _bea = join(addr, "SPIN1", 2, "bea")?;

    let waiting = wait_for(&mut ana.scenes, |s| s.session.players().len() == 2).await?;
    assert_eq!(waiting.session.status, TableStatus::Waiting);
    assert!(matches!(waiting.input, InputState::Blocked(_)));

    let _cruz = join(addr, "SPIN1", 3, "cruz")?;
    let spinning = wait_for(&mut ana.scenes, |s| s.prize.is_some()).await?;
    assert_eq!(spinning.session.players().len(), 3);

    let revealed =
        wait_for(&mut ana.scenes, |s| s.prize.as_ref().is_some_and(|p| p.revealed())).await?;
    assert!(revealed.session.final_prize.is_some());

    wait_for(&mut ana.scenes, |s| {
        s.session.status == TableStatus::Playing && s.input == InputState::Ready
    })
    .await?;

    ana.commands.send(UiCommand::Roll).await?;
    let rolled = wait_for(&mut ana.scenes, |s| {
        s.session.player(1).is_some_and(|p| p.last_roll.is_some())
    })
    .await?;
    assert_eq!(rolled.session.status, TableStatus::Playing);

    // a second roll in the same round is refused by the host and surfaces as a notice
    ana.commands.send(UiCommand::Roll).await?;
    let refused = wait_for(&mut ana.scenes, |s| matches!(s.notice, Some(Notice::Server(_)))).await?;
    assert_eq!(refused.input, InputState::Ready);
    Ok(())
}

#[tokio::test]
async fn test_fourth_player_is_turned_away_without_reconnecting() -> Result<()> {
    let addr = start_host(3).await?;
    let mut seated = Vec::new();
    for (id, name) in [(1, "ana"), (2, "bea"), (3, "cruz")] {
        let mut client = join(addr, "BUSY1", id, name)?;
        wait_for(&mut client.scenes, |s| s.session.player(id).is_some()).await?;
        seated.push(client);
    }

    let mut dan = join(addr, "BUSY1", 4, "dan")?;
    let turned_away =
        wait_for(&mut dan.scenes, |s| matches!(s.link, LinkState::Disconnected { .. })).await?;
    assert_eq!(turned_away.link, LinkState::Disconnected { code: POLICY });
    assert!(turned_away.session.player(4).is_none());

    // well past the reconnect delay, still down
    tokio::time::sleep(Duration::from_millis(400)).await;
    while let Ok(scene) = dan.scenes.try_recv() {
        assert_eq!(scene.link, LinkState::Disconnected { code: POLICY });
    }
    Ok(())
}

/// Sends a table in play, then swallows every frame it gets without answering
async fn silent_table() -> Result<(SocketAddr, mpsc::UnboundedReceiver<String>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (heard_tx, heard) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
            return;
        };
        let state = r#"{"type":"game_state","status":"PLAYING","round_number":0,"players":[
            {"user_id":1,"username":"ana"},
            {"user_id":2,"username":"bea"},
            {"user_id":3,"username":"cruz"}]}"#;
        if ws.send(state.into()).await.is_err() {
            return;
        }
        while let Some(Ok(frame)) = ws.next().await {
            if let Ok(text) = frame.into_text() {
                let _ = heard_tx.send(text.to_string());
            }
        }
    });

    Ok((addr, heard))
}

#[tokio::test]
async fn test_unanswered_roll_is_released_by_the_fallback() -> Result<()> {
    let (addr, mut heard) = silent_table().await?;
    let timings = Timings { input_fallback: Duration::from_millis(400), ..fast() };
    let mut ana = join_with(addr, "QUIET1", 1, "ana", timings)?;

    wait_for(&mut ana.scenes, |s| s.input == InputState::Ready).await?;
    ana.commands.send(UiCommand::Roll).await?;
    let pending = wait_for(&mut ana.scenes, |s| s.input != InputState::Ready).await?;
    assert_eq!(pending.input, InputState::Pending);
    let sent = tokio::time::Instant::now();

    let frame = timeout(PATIENCE, heard.recv()).await?.ok_or_else(|| anyhow!("no frame"))?;
    assert_eq!(frame, r#"{"type":"roll_dice"}"#);

    let released = wait_for(&mut ana.scenes, |s| s.input == InputState::Ready).await?;
    assert!(sent.elapsed() >= Duration::from_millis(300));
    assert_eq!(released.session.status, TableStatus::Playing);
    assert!(released.session.player(1).is_some_and(|p| p.last_roll.is_none()));

    ana.commands.send(UiCommand::Quit).await?;
    ana.task.await??;
    Ok(())
}
