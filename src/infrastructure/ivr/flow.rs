/// IVR interpreter: walks a menu tree one input at a time
///
/// The interpreter is a pure state machine. It never plays audio or waits on
/// timers itself; each input returns an [`IvrStep`] naming the prompts to play
/// and what to do next, and the caller drives playback and digit collection.
use super::dtmf::DtmfDigit;
use super::menu::{ExhaustedPolicy, IvrMenuTree, MenuAction, MenuNode, NodeId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What the runner should do after playing the step's prompts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IvrNext {
    /// Wait for the next digit on the current node
    Continue,
    /// Leave the IVR and queue the caller; `target` is an optional team id
    Transfer { target: Option<String> },
    Hangup,
    /// Leave the IVR and hand the contact to a text flow
    GotoFlow { target: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IvrStep {
    /// Audio prompts to play, in order
    pub prompts: Vec<String>,
    pub next: IvrNext,
}

impl IvrStep {
    fn new(prompts: Vec<String>, next: IvrNext) -> Self {
        Self { prompts, next }
    }

    fn silent(next: IvrNext) -> Self {
        Self::new(Vec::new(), next)
    }

    pub fn is_final(&self) -> bool {
        self.next != IvrNext::Continue
    }
}

/// IVR session state for one call
#[derive(Debug, Clone)]
pub struct IvrInterpreter {
    tree: Arc<IvrMenuTree>,
    current: NodeId,
    retries: u32,
}

impl IvrInterpreter {
    pub fn new(tree: Arc<IvrMenuTree>) -> Self {
        let current = tree.root();
        Self {
            tree,
            current,
            retries: 0,
        }
    }

    /// Enter the root menu
    pub fn start(&mut self) -> IvrStep {
        self.current = self.tree.root();
        self.retries = 0;
        IvrStep::new(greeting(self.node()), IvrNext::Continue)
    }

    pub fn current(&self) -> NodeId {
        self.current
    }

    pub fn node(&self) -> &MenuNode {
        self.tree.node(self.current)
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// How long to wait for a digit on the current node
    pub fn timeout(&self) -> Duration {
        self.node().timeout
    }

    /// Process one DTMF digit
    pub fn on_digit(&mut self, digit: DtmfDigit) -> IvrStep {
        let Some(option) = self.node().option(digit).cloned() else {
            debug!("Digit '{}' not mapped on current menu", digit);
            return self.invalid_input();
        };

        info!("IVR option '{}' selected: {:?}", digit, option.action);
        match option.action {
            MenuAction::Transfer => IvrStep::silent(IvrNext::Transfer {
                target: option.target,
            }),
            MenuAction::Submenu => match option.child {
                Some(child) => {
                    self.current = child;
                    self.retries = 0;
                    IvrStep::new(greeting(self.node()), IvrNext::Continue)
                }
                None => {
                    warn!("Submenu option '{}' has no child node", digit);
                    self.invalid_input()
                }
            },
            MenuAction::Repeat => IvrStep::new(greeting(self.node()), IvrNext::Continue),
            MenuAction::Parent => match self.tree.parent(self.current) {
                Some(parent) => {
                    self.current = parent;
                    self.retries = 0;
                    IvrStep::new(greeting(self.node()), IvrNext::Continue)
                }
                // Already at the root
                None => IvrStep::silent(IvrNext::Continue),
            },
            MenuAction::Hangup => IvrStep::silent(IvrNext::Hangup),
            MenuAction::GotoFlow => IvrStep::silent(IvrNext::GotoFlow {
                target: option.target,
            }),
        }
    }

    /// No digit arrived within the node timeout
    pub fn on_timeout(&mut self) -> IvrStep {
        debug!("IVR input timeout");
        self.invalid_input()
    }

    fn invalid_input(&mut self) -> IvrStep {
        self.retries += 1;
        let node = self.node();
        let mut prompts: Vec<String> = node.invalid_input_message.iter().cloned().collect();

        if self.retries > node.max_retries {
            warn!("IVR retries exhausted ({}), applying {:?}", self.retries, node.on_exhausted);
            let next = match node.on_exhausted {
                ExhaustedPolicy::Transfer => IvrNext::Transfer { target: None },
                ExhaustedPolicy::Hangup => IvrNext::Hangup,
            };
            return IvrStep::new(prompts, next);
        }

        prompts.extend(greeting(node));
        IvrStep::new(prompts, IvrNext::Continue)
    }
}

fn greeting(node: &MenuNode) -> Vec<String> {
    node.greeting.iter().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::ivr::menu::IvrMenuBuilder;

    /// root -> 2 (billing) -> 3 (disputes)
    fn three_level_tree() -> Arc<IvrMenuTree> {
        let disputes = IvrMenuBuilder::new("disputes.ogg")
            .max_retries(1)
            .on_exhausted(ExhaustedPolicy::Hangup)
            .option('1', "Agent", MenuAction::Transfer, Some("team-disputes"))
            .option('9', "Back", MenuAction::Parent, None);
        let billing = IvrMenuBuilder::new("billing.ogg")
            .submenu('3', "Disputes", disputes)
            .option('9', "Back", MenuAction::Parent, None)
            .option('*', "Repeat", MenuAction::Repeat, None);
        Arc::new(
            IvrMenuBuilder::new("welcome.ogg")
                .max_retries(2)
                .invalid_input_message("invalid.ogg")
                .submenu('2', "Billing", billing)
                .option('0', "Bye", MenuAction::Hangup, None)
                .option('9', "Back", MenuAction::Parent, None)
                .option('#', "Chat", MenuAction::GotoFlow, Some("flow-1"))
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_start_plays_root_greeting() {
        let mut ivr = IvrInterpreter::new(three_level_tree());
        let step = ivr.start();
        assert_eq!(step.prompts, vec!["welcome.ogg".to_string()]);
        assert_eq!(step.next, IvrNext::Continue);
        assert_eq!(ivr.current(), NodeId::ROOT);
    }

    #[test]
    fn test_three_level_traversal() {
        let tree = three_level_tree();
        let mut ivr = IvrInterpreter::new(tree.clone());
        ivr.start();

        let step = ivr.on_digit(DtmfDigit::Two);
        assert_eq!(step.prompts, vec!["billing.ogg".to_string()]);
        assert_eq!(tree.depth(ivr.current()), 1);

        let step = ivr.on_digit(DtmfDigit::Three);
        assert_eq!(step.prompts, vec!["disputes.ogg".to_string()]);
        assert_eq!(tree.depth(ivr.current()), 2);

        // back up one level, then down again
        let step = ivr.on_digit(DtmfDigit::Nine);
        assert_eq!(step.prompts, vec!["billing.ogg".to_string()]);
        ivr.on_digit(DtmfDigit::Three);

        let step = ivr.on_digit(DtmfDigit::One);
        assert_eq!(
            step.next,
            IvrNext::Transfer {
                target: Some("team-disputes".to_string())
            }
        );
        assert!(step.is_final());
    }

    #[test]
    fn test_parent_at_root_is_noop() {
        let mut ivr = IvrInterpreter::new(three_level_tree());
        ivr.start();
        let step = ivr.on_digit(DtmfDigit::Nine);
        assert!(step.prompts.is_empty());
        assert_eq!(step.next, IvrNext::Continue);
        assert_eq!(ivr.current(), NodeId::ROOT);
    }

    #[test]
    fn test_unmapped_digit_plays_invalid_and_counts_retry() {
        let mut ivr = IvrInterpreter::new(three_level_tree());
        ivr.start();
        let step = ivr.on_digit(DtmfDigit::Five);
        assert_eq!(
            step.prompts,
            vec!["invalid.ogg".to_string(), "welcome.ogg".to_string()]
        );
        assert_eq!(step.next, IvrNext::Continue);
        assert_eq!(ivr.retries(), 1);
    }

    #[test]
    fn test_timeouts_exhaust_to_general_queue() {
        let mut ivr = IvrInterpreter::new(three_level_tree());
        ivr.start();
        assert_eq!(ivr.on_timeout().next, IvrNext::Continue);
        assert_eq!(ivr.on_timeout().next, IvrNext::Continue);

        let step = ivr.on_timeout();
        assert_eq!(ivr.retries(), 3);
        assert_eq!(step.prompts, vec!["invalid.ogg".to_string()]);
        assert_eq!(step.next, IvrNext::Transfer { target: None });
    }

    #[test]
    fn test_exhaustion_policy_hangup() {
        let mut ivr = IvrInterpreter::new(three_level_tree());
        ivr.start();
        ivr.on_digit(DtmfDigit::Two);
        ivr.on_digit(DtmfDigit::Three);

        assert_eq!(ivr.on_digit(DtmfDigit::Seven).next, IvrNext::Continue);
        assert_eq!(ivr.on_digit(DtmfDigit::Seven).next, IvrNext::Hangup);
    }

    #[test]
    fn test_valid_navigation_resets_retries() {
        let mut ivr = IvrInterpreter::new(three_level_tree());
        ivr.start();
        ivr.on_timeout();
        assert_eq!(ivr.retries(), 1);
        ivr.on_digit(DtmfDigit::Two);
        assert_eq!(ivr.retries(), 0);
    }

    #[test]
    fn test_repeat_hangup_and_goto_flow() {
        let mut ivr = IvrInterpreter::new(three_level_tree());
        ivr.start();
        ivr.on_digit(DtmfDigit::Two);
        assert_eq!(
            ivr.on_digit(DtmfDigit::Star).prompts,
            vec!["billing.ogg".to_string()]
        );

        let mut ivr = IvrInterpreter::new(three_level_tree());
        ivr.start();
        assert_eq!(ivr.on_digit(DtmfDigit::Zero).next, IvrNext::Hangup);

        let mut ivr = IvrInterpreter::new(three_level_tree());
        ivr.start();
        assert_eq!(
            ivr.on_digit(DtmfDigit::Pound).next,
            IvrNext::GotoFlow {
                target: Some("flow-1".to_string())
            }
        );
    }

    #[test]
    fn test_no_retries_exhausts_on_first_invalid_digit() {
        let tree = Arc::new(
            IvrMenuBuilder::new("main.ogg")
                .max_retries(0)
                .invalid_input_message("invalid.ogg")
                .option('1', "Sales", MenuAction::Transfer, Some("team-sales"))
                .build()
                .unwrap(),
        );
        let mut ivr = IvrInterpreter::new(tree);
        ivr.start();

        let step = ivr.on_digit(DtmfDigit::Five);
        assert_eq!(step.prompts, vec!["invalid.ogg".to_string()]);
        assert_eq!(step.next, IvrNext::Transfer { target: None });
    }
}
