mod common;

use async_trait::async_trait;
use common::{
    FakeInput, FakeScreen, InputCall, LoggingChannel, OpLog, RecordingSleeper, ScriptedPlanner,
    StaticPerceiver, Workspace, instant_options, planner_reply, png_bytes, poller,
};
use remote_rpa::elements::ElementSet;
use remote_rpa::hands::Key;
use remote_rpa::perception::{Perceiver, Perception, PerceptionError};
use remote_rpa::{
    BoundingBox, BrainLoop, BrainOptions, Executor, LoopExit, StepOutcome,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn settings_screen() -> ElementSet {
    let mut elements = ElementSet::default();
    elements.insert(
        "0",
        BoundingBox::new(0.0, 0.0, 800.0, 30.0),
        "Text Box ID 0: Display preferences",
    );
    elements.insert(
        "2",
        BoundingBox::new(100.0, 200.0, 40.0, 20.0),
        "Icon Box ID 2: Settings icon",
    );
    elements.insert(
        "4",
        BoundingBox::new(50.0, 60.0, 100.0, 20.0),
        "Text Box ID 4: Search",
    );
    elements
}

fn options(max_steps: u64) -> BrainOptions {
    BrainOptions {
        settle: Duration::ZERO,
        max_steps: Some(max_steps),
        history_window: None,
    }
}

fn seed_brain_side(ws: &Workspace, task: &str) {
    std::fs::write(
        ws.path("brain/task.json"),
        serde_json::to_vec(&serde_json::json!({ "task": task })).unwrap(),
    )
    .unwrap();
    std::fs::write(ws.path("brain/imgs/screenshot_0.png"), png_bytes()).unwrap();
}

fn read_outcome(ws: &Workspace, step: u64) -> StepOutcome {
    let bytes = std::fs::read(ws.path(&format!("brain/results/result_{step}.json"))).unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn brain(
    ws: &Workspace,
    perceiver: Arc<dyn Perceiver>,
    planner: Arc<ScriptedPlanner>,
    max_steps: u64,
) -> BrainLoop {
    BrainLoop::new(
        ws.brain_paths(),
        perceiver,
        planner,
        poller(Arc::new(RecordingSleeper::new()), CancellationToken::new()),
        options(max_steps),
    )
}

#[tokio::test]
async fn resolves_the_planned_element_to_its_box() {
    let ws = Workspace::new();
    seed_brain_side(&ws, "Turn on dark mode");
    let planner = Arc::new(ScriptedPlanner::new([planner_reply(
        "click",
        "Icon Box ID 2: Settings icon",
        "",
    )]));

    let exit = brain(&ws, Arc::new(StaticPerceiver::new(settings_screen())), planner.clone(), 1)
        .run()
        .await
        .unwrap();

    assert_eq!(exit, LoopExit::StepLimit { steps: 1 });
    match read_outcome(&ws, 0) {
        StepOutcome::Decision(decision) => {
            assert_eq!(decision.element, "Icon Box ID 2: Settings icon");
            assert_eq!(
                decision.coordinates,
                Some(BoundingBox::new(100.0, 200.0, 40.0, 20.0))
            );
        }
        other => panic!("expected a decision, got {other:?}"),
    }
    let labeled = std::fs::read(ws.path("brain/results/labeled_screenshot_0.png")).unwrap();
    assert!(image::load_from_memory(&labeled).is_ok());
    assert_eq!(planner.tasks(), vec!["Turn on dark mode".to_string()]);
}

#[tokio::test]
async fn unknown_element_key_becomes_an_error_outcome() {
    let ws = Workspace::new();
    seed_brain_side(&ws, "submit the form");
    let planner = Arc::new(ScriptedPlanner::new([planner_reply(
        "click",
        "Text Box/Icon Box ID 3: Submit",
        "",
    )]));

    brain(&ws, Arc::new(StaticPerceiver::new(settings_screen())), planner, 1)
        .run()
        .await
        .unwrap();

    match read_outcome(&ws, 0) {
        StepOutcome::Error { reason } => assert!(reason.contains("\"3\""), "{reason}"),
        other => panic!("expected an error, got {other:?}"),
    }
    assert!(ws.path("brain/results/labeled_screenshot_0.png").exists());
}

#[tokio::test]
async fn unparsable_reply_becomes_an_error_outcome() {
    let ws = Workspace::new();
    seed_brain_side(&ws, "anything");
    let planner = Arc::new(ScriptedPlanner::new(["I am not sure what to do next."]));

    brain(&ws, Arc::new(StaticPerceiver::new(settings_screen())), planner, 1)
        .run()
        .await
        .unwrap();

    assert!(matches!(read_outcome(&ws, 0), StepOutcome::Error { .. }));
}

struct BrokenPerceiver;

#[async_trait]
impl Perceiver for BrokenPerceiver {
    async fn perceive(&self, _screenshot_png: &[u8]) -> Result<Perception, PerceptionError> {
        Err(PerceptionError::Service {
            status: 503,
            body: "model loading".into(),
        })
    }
}

#[tokio::test]
async fn perception_failure_still_emits_both_artifacts() {
    let ws = Workspace::new();
    seed_brain_side(&ws, "anything");
    let planner = Arc::new(ScriptedPlanner::new(Vec::<String>::new()));

    brain(&ws, Arc::new(BrokenPerceiver), planner.clone(), 1)
        .run()
        .await
        .unwrap();

    match read_outcome(&ws, 0) {
        StepOutcome::Error { reason } => assert!(reason.contains("503"), "{reason}"),
        other => panic!("expected an error, got {other:?}"),
    }
    assert_eq!(
        std::fs::read(ws.path("brain/results/labeled_screenshot_0.png")).unwrap(),
        png_bytes()
    );
    assert!(planner.tasks().is_empty());
}

#[tokio::test]
async fn unreadable_screenshot_still_emits_both_artifacts() {
    let ws = Workspace::new();
    seed_brain_side(&ws, "anything");
    std::fs::remove_file(ws.path("brain/imgs/screenshot_0.png")).unwrap();
    std::fs::create_dir(ws.path("brain/imgs/screenshot_0.png")).unwrap();
    let planner = Arc::new(ScriptedPlanner::new(Vec::<String>::new()));

    brain(&ws, Arc::new(StaticPerceiver::new(settings_screen())), planner.clone(), 1)
        .run()
        .await
        .unwrap();

    match read_outcome(&ws, 0) {
        StepOutcome::Error { reason } => assert!(reason.contains("unreadable screenshot"), "{reason}"),
        other => panic!("expected an error, got {other:?}"),
    }
    let labeled = std::fs::read(ws.path("brain/results/labeled_screenshot_0.png")).unwrap();
    assert!(image::load_from_memory(&labeled).is_ok());
    assert!(planner.tasks().is_empty());
}

#[tokio::test]
async fn waits_for_the_task_until_cancelled() {
    let ws = Workspace::new();
    let cancel = CancellationToken::new();
    let sleeper = Arc::new(RecordingSleeper::cancelling_after(3, cancel.clone()));
    let planner = Arc::new(ScriptedPlanner::new(Vec::<String>::new()));

    let exit = BrainLoop::new(
        ws.brain_paths(),
        Arc::new(StaticPerceiver::new(settings_screen())),
        planner,
        poller(sleeper.clone(), cancel),
        options(1),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(exit, LoopExit::Cancelled { steps: 0 });
    assert_eq!(sleeper.sleeps().len(), 3);
}

#[tokio::test]
async fn brain_and_hands_complete_a_task_together() {
    let ws = Workspace::new();
    let planner = Arc::new(ScriptedPlanner::new([
        planner_reply("click", "Icon Box ID 2: Settings icon", ""),
        planner_reply("type", "Text Box ID 4: Search", "dark mode"),
    ]));
    let brain = brain(&ws, Arc::new(StaticPerceiver::new(settings_screen())), planner.clone(), 2);

    let log = OpLog::default();
    let input = Arc::new(FakeInput::new(log.clone()));
    let mut executor = Executor::new(
        ws.config(),
        Arc::new(LoggingChannel::new(log)),
        input.clone(),
        Arc::new(FakeScreen),
        poller(Arc::new(RecordingSleeper::new()), CancellationToken::new()),
        instant_options(Some(2)),
    );

    let (brain_exit, hands_exit) = tokio::time::timeout(Duration::from_secs(30), async {
        tokio::join!(brain.run(), executor.run("Turn on dark mode"))
    })
    .await
    .expect("loops did not finish");

    assert_eq!(brain_exit.unwrap(), LoopExit::StepLimit { steps: 2 });
    assert_eq!(hands_exit.unwrap(), LoopExit::StepLimit { steps: 2 });
    assert_eq!(
        input.calls(),
        vec![
            InputCall::Click(120.0, 210.0),
            InputCall::Click(100.0, 70.0),
            InputCall::Type("dark mode".into()),
            InputCall::Press(Key::Enter),
        ]
    );

    let prompts = planner.tasks();
    assert_eq!(prompts.len(), 2);
    assert_eq!(
        prompts[1],
        "Turn on dark mode\n\nSteps already taken:\n- step 0: click Icon Box ID 2: Settings icon"
    );
}
