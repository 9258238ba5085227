//! Flow execution: match an inbound message to a flow, resume the contact's
//! position, perform the current node's action and advance state.
//!
//! One inbound message drives one node (condition nodes and a consumed
//! button selection chain into the same pass). There is no transactional
//! grouping: a failed send is logged and the advance still runs, so the
//! webhook can keep acknowledging the provider.

pub mod condition;

use chrono::Utc;
use log::{debug, error, info, warn};
use std::sync::Arc;
use uuid::Uuid;

use crate::shared::models::{
    ButtonOption, ButtonsData, ChatFlow, Contact, FlowNode, MessageRecord, NodeKind,
};
use crate::store::{self, DataStore};
use crate::whatsapp::client::MessageSender;
use condition::{ConditionEvaluator, SubstringEvaluator};

const DEFAULT_TEXT: &str = "Hello!";
const DEFAULT_BUTTONS_PROMPT: &str = "Choose an option:";

/// Bound on condition hops (and a consumed button jump) within one pass, so
/// an authored cycle of condition nodes cannot spin forever.
const MAX_HOPS: usize = 16;

#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub phone: String,
    pub name: Option<String>,
    pub content: String,
    pub provider_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowOutcome {
    /// No active flow could be selected for the message.
    NoFlow,
    /// The selected flow has no nodes to execute.
    NoStartNode,
    /// A condition gate did not produce a transition; nothing was sent.
    NoTransition,
    Executed { flow_id: String, node_id: String },
}

pub struct FlowExecutor {
    store: Arc<dyn DataStore>,
    sender: Arc<dyn MessageSender>,
    evaluator: Box<dyn ConditionEvaluator>,
}

impl FlowExecutor {
    pub fn new(store: Arc<dyn DataStore>, sender: Arc<dyn MessageSender>) -> Self {
        Self::with_evaluator(store, sender, Box::new(SubstringEvaluator))
    }

    pub fn with_evaluator(
        store: Arc<dyn DataStore>,
        sender: Arc<dyn MessageSender>,
        evaluator: Box<dyn ConditionEvaluator>,
    ) -> Self {
        Self {
            store,
            sender,
            evaluator,
        }
    }

    pub async fn handle_inbound(&self, inbound: &InboundMessage) -> FlowOutcome {
        let flows = match self.store.active_flows().await {
            Ok(flows) => flows,
            Err(e) => {
                warn!("Failed to load flows, treating as none: {}", e);
                Vec::new()
            }
        };
        if flows.is_empty() {
            debug!("No active flows for message from {}", inbound.phone);
            return FlowOutcome::NoFlow;
        }

        let contact = match self.store.contact_by_phone(&inbound.phone).await {
            Ok(contact) => contact,
            Err(e) => {
                warn!("Failed to load contact {}: {}", inbound.phone, e);
                None
            }
        };

        let (flow, node, resumed) = match resume_position(&flows, contact.as_ref()) {
            Some((flow, node)) => (flow, node, true),
            None => {
                let Some(flow) = select_flow(&flows, &inbound.content) else {
                    return FlowOutcome::NoFlow;
                };
                let Some(node) = flow.first_node() else {
                    info!("Flow {} has no nodes", flow.id);
                    return FlowOutcome::NoStartNode;
                };
                (flow, node, false)
            }
        };

        self.run(flow, node, resumed, inbound).await
    }

    async fn run(
        &self,
        flow: &ChatFlow,
        start: &FlowNode,
        resumed: bool,
        inbound: &InboundMessage,
    ) -> FlowOutcome {
        let mut node = start;
        let mut consume_reply = resumed;

        for _ in 0..MAX_HOPS {
            if let NodeKind::Condition(data) = &node.kind {
                let expression = data.condition.as_deref().unwrap_or("");
                if !self.evaluator.is_satisfied(expression, &inbound.content) {
                    debug!(
                        "Condition {} unmet for {}; no transition",
                        node.id, inbound.phone
                    );
                    return FlowOutcome::NoTransition;
                }
                let Some(next) = true_edge_target(flow, node) else {
                    debug!("Condition {} met but no true/yes edge", node.id);
                    return FlowOutcome::NoTransition;
                };
                node = next;
                consume_reply = false;
                continue;
            }

            if consume_reply {
                consume_reply = false;
                // A contact parked on a buttons node answers with a
                // selection; jump straight to the selected branch instead of
                // re-sending the prompt. A reply that selects nothing falls
                // through and re-prompts.
                if let NodeKind::Buttons(data) = &node.kind {
                    if let Some(button) = matching_button(data, &inbound.content) {
                        if let Some(next) = button_target(flow, node, button) {
                            node = next;
                            continue;
                        }
                    }
                }
            }

            return self.execute(flow, node, inbound).await;
        }

        warn!(
            "Aborting flow {} for {}: too many hops in one pass",
            flow.id, inbound.phone
        );
        FlowOutcome::NoTransition
    }

    /// Perform the node's action, compute the next position and persist it.
    async fn execute(&self, flow: &ChatFlow, node: &FlowNode, inbound: &InboundMessage) -> FlowOutcome {
        self.perform_action(flow, node, inbound).await;

        let position = next_node(flow, node, &inbound.content)
            .map(|n| n.id.as_str())
            .unwrap_or(node.id.as_str());
        if let Err(e) = self
            .store
            .set_contact_position(&inbound.phone, &flow.id, position)
            .await
        {
            error!("Failed to persist position for {}: {}", inbound.phone, e);
        }

        FlowOutcome::Executed {
            flow_id: flow.id.clone(),
            node_id: node.id.clone(),
        }
    }

    async fn perform_action(&self, flow: &ChatFlow, node: &FlowNode, inbound: &InboundMessage) {
        let to = inbound.phone.as_str();
        let result = match &node.kind {
            NodeKind::Text(data) => {
                let body = data
                    .content
                    .as_deref()
                    .filter(|c| !c.trim().is_empty())
                    .unwrap_or(DEFAULT_TEXT);
                Some((body.to_string(), "text", self.sender.send_text(to, body).await))
            }
            NodeKind::Buttons(data) => {
                let body = data
                    .content
                    .as_deref()
                    .filter(|c| !c.trim().is_empty())
                    .unwrap_or(DEFAULT_BUTTONS_PROMPT);
                Some((
                    body.to_string(),
                    "button",
                    self.sender.send_buttons(to, body, &data.buttons).await,
                ))
            }
            NodeKind::Image(data) => match data.file_url.as_deref().filter(|u| !u.is_empty()) {
                Some(link) => {
                    let caption = data.content.as_deref();
                    Some((
                        caption.unwrap_or("Image").to_string(),
                        "image",
                        self.sender.send_image(to, link, caption).await,
                    ))
                }
                None => {
                    debug!("Image node {} has no file url; skipping send", node.id);
                    None
                }
            },
            // Modeled but not executed on this path.
            NodeKind::Pdf(_) | NodeKind::Video(_) | NodeKind::Template(_) | NodeKind::Webhook(_) => {
                debug!("Node {} of unexecuted kind; skipping send", node.id);
                None
            }
            NodeKind::Condition(_) => None,
        };

        let Some((content, kind, result)) = result else {
            return;
        };

        match result {
            Ok(provider_id) => {
                self.record_outbound(flow, node, to, content, kind, provider_id)
                    .await;
            }
            Err(e) => {
                // Deliberately keep going: the advance below still runs.
                error!("Failed to send {} for node {}: {}", kind, node.id, e);
            }
        }
    }

    async fn record_outbound(
        &self,
        flow: &ChatFlow,
        node: &FlowNode,
        to: &str,
        content: String,
        kind: &str,
        provider_id: Option<String>,
    ) {
        let record = MessageRecord {
            id: format!("msg_{}", Uuid::new_v4()),
            from: "bot".to_string(),
            to: to.to_string(),
            content,
            kind: kind.to_string(),
            message_id: provider_id,
            status: "sent".to_string(),
            timestamp: Utc::now(),
            flow_id: Some(flow.id.clone()),
            node_id: Some(node.id.clone()),
        };
        if let Err(e) = self.store.insert_message(&record).await {
            error!("Failed to record outbound message: {}", e);
        }
        store::bump_messages_sent(self.store.as_ref()).await;
    }
}

/// A contact with a recorded position resumes there, provided the flow is
/// still active and the node still exists; anything stale falls back to
/// fresh selection.
fn resume_position<'a>(
    flows: &'a [ChatFlow],
    contact: Option<&Contact>,
) -> Option<(&'a ChatFlow, &'a FlowNode)> {
    let contact = contact?;
    let flow_id = contact.current_flow.as_deref()?;
    let node_id = contact.current_node.as_deref()?;
    let flow = flows.iter().find(|f| f.id == flow_id)?;
    let node = flow.node(node_id)?;
    Some((flow, node))
}

/// First active flow with a trigger keyword contained in the message,
/// falling back to the first active flow.
fn select_flow<'a>(flows: &'a [ChatFlow], content: &str) -> Option<&'a ChatFlow> {
    let text = content.to_lowercase();
    flows
        .iter()
        .find(|flow| {
            flow.trigger_keywords.iter().any(|keyword| {
                let keyword = keyword.trim().to_lowercase();
                !keyword.is_empty() && text.contains(&keyword)
            })
        })
        .or_else(|| flows.first())
}

/// A reply selects a button when it is a case-insensitive substring of the
/// button's text, or exactly equals the button's value.
fn matching_button<'a>(data: &'a ButtonsData, reply: &str) -> Option<&'a ButtonOption> {
    let trimmed = reply.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lower = trimmed.to_lowercase();
    data.buttons.iter().find(|button| {
        button.text.to_lowercase().contains(&lower) || button.value.as_deref() == Some(trimmed)
    })
}

/// Edge labeled with the button's exact text, falling back to the first
/// outgoing edge.
fn button_target<'a>(
    flow: &'a ChatFlow,
    node: &FlowNode,
    button: &ButtonOption,
) -> Option<&'a FlowNode> {
    let edges: Vec<_> = flow.edges_from(&node.id).collect();
    let chosen = edges
        .iter()
        .find(|e| e.label.as_deref() == Some(button.text.as_str()))
        .or_else(|| edges.first());
    chosen.and_then(|e| flow.node(&e.target))
}

fn true_edge_target<'a>(flow: &'a ChatFlow, node: &FlowNode) -> Option<&'a FlowNode> {
    flow.edges_from(&node.id)
        .find(|e| {
            matches!(
                e.label.as_deref().map(str::to_lowercase).as_deref(),
                Some("true") | Some("yes")
            )
        })
        .and_then(|e| flow.node(&e.target))
}

/// Where the contact lands after this node. Buttons advance only on a
/// selected reply; everything else takes the first outgoing edge.
fn next_node<'a>(flow: &'a ChatFlow, node: &FlowNode, reply: &str) -> Option<&'a FlowNode> {
    match &node.kind {
        NodeKind::Buttons(data) => {
            let button = matching_button(data, reply)?;
            button_target(flow, node, button)
        }
        _ => flow
            .edges_from(&node.id)
            .next()
            .and_then(|e| flow.node(&e.target)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::models::{
        ButtonsData, ConditionData, FlowEdge, MediaData, TextData, WhatsAppConfigRow,
    };
    use crate::store::MemoryStore;
    use crate::whatsapp::client::SendError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Sent {
        Text { to: String, body: String },
        Buttons { to: String, body: String, options: Vec<String> },
        Image { to: String, link: String },
    }

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<Sent>>,
        fail: AtomicBool,
    }

    impl RecordingSender {
        fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }

        fn fail_all(&self) {
            self.fail.store(true, Ordering::SeqCst);
        }

        fn push(&self, sent: Sent) -> Result<Option<String>, SendError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(SendError::Api {
                    status: 500,
                    body: "boom".to_string(),
                });
            }
            self.sent.lock().unwrap().push(sent);
            Ok(Some("wamid.test".to_string()))
        }
    }

    #[async_trait]
    impl MessageSender for RecordingSender {
        async fn send_text(&self, to: &str, body: &str) -> Result<Option<String>, SendError> {
            self.push(Sent::Text {
                to: to.to_string(),
                body: body.to_string(),
            })
        }

        async fn send_buttons(
            &self,
            to: &str,
            body: &str,
            options: &[ButtonOption],
        ) -> Result<Option<String>, SendError> {
            self.push(Sent::Buttons {
                to: to.to_string(),
                body: body.to_string(),
                options: options.iter().map(|o| o.text.clone()).collect(),
            })
        }

        async fn send_image(
            &self,
            to: &str,
            link: &str,
            _caption: Option<&str>,
        ) -> Result<Option<String>, SendError> {
            self.push(Sent::Image {
                to: to.to_string(),
                link: link.to_string(),
            })
        }

        async fn mark_as_read(&self, _message_id: &str) -> Result<(), SendError> {
            Ok(())
        }
    }

    fn text_node(id: &str, content: &str) -> FlowNode {
        FlowNode {
            id: id.to_string(),
            kind: NodeKind::Text(TextData {
                content: if content.is_empty() {
                    None
                } else {
                    Some(content.to_string())
                },
            }),
        }
    }

    fn buttons_node(id: &str, prompt: &str, labels: &[&str]) -> FlowNode {
        FlowNode {
            id: id.to_string(),
            kind: NodeKind::Buttons(ButtonsData {
                content: Some(prompt.to_string()),
                buttons: labels
                    .iter()
                    .map(|l| ButtonOption {
                        id: None,
                        text: l.to_string(),
                        value: None,
                    })
                    .collect(),
            }),
        }
    }

    fn edge(id: &str, source: &str, target: &str, label: Option<&str>) -> FlowEdge {
        FlowEdge {
            id: id.to_string(),
            source: source.to_string(),
            target: target.to_string(),
            label: label.map(str::to_string),
            condition: None,
        }
    }

    fn flow(id: &str, keywords: &[&str], nodes: Vec<FlowNode>, edges: Vec<FlowEdge>) -> ChatFlow {
        ChatFlow {
            id: id.to_string(),
            name: id.to_string(),
            description: None,
            nodes,
            edges,
            is_active: true,
            trigger_keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }

    fn inbound(content: &str) -> InboundMessage {
        InboundMessage {
            phone: "5511999990000".to_string(),
            name: Some("Maria".to_string()),
            content: content.to_string(),
            provider_id: "wamid.in".to_string(),
        }
    }

    fn executor(store: Arc<MemoryStore>, sender: Arc<RecordingSender>) -> FlowExecutor {
        FlowExecutor::new(store, sender)
    }

    async fn seed_contact(store: &MemoryStore, flow_id: Option<&str>, node_id: Option<&str>) {
        let contact = Contact {
            id: "contact_5511999990000".to_string(),
            phone: "5511999990000".to_string(),
            name: Some("Maria".to_string()),
            current_flow: flow_id.map(str::to_string),
            current_node: node_id.map(str::to_string),
            variables: None,
            last_interaction: Utc::now(),
            conversation_state: None,
        };
        store.upsert_contact(&contact).await.unwrap();
    }

    #[tokio::test]
    async fn selects_flow_by_trigger_keyword() {
        let store = Arc::new(MemoryStore::new());
        store.put_flow(flow(
            "flow_geral",
            &["horário"],
            vec![text_node("g1", "Horários da secretaria")],
            vec![],
        ));
        store.put_flow(flow(
            "flow_missa",
            &["missa"],
            vec![text_node("m1", "Missas: domingo 10h")],
            vec![],
        ));

        let sender = Arc::new(RecordingSender::default());
        let outcome = executor(store, sender.clone())
            .handle_inbound(&inbound("Quero agendar uma missa"))
            .await;

        assert_eq!(
            outcome,
            FlowOutcome::Executed {
                flow_id: "flow_missa".to_string(),
                node_id: "m1".to_string()
            }
        );
        assert_eq!(
            sender.sent(),
            vec![Sent::Text {
                to: "5511999990000".to_string(),
                body: "Missas: domingo 10h".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn falls_back_to_first_active_flow() {
        let store = Arc::new(MemoryStore::new());
        store.put_flow(flow(
            "flow_padrao",
            &["missa"],
            vec![text_node("p1", "Bem-vindo à paróquia")],
            vec![],
        ));

        let sender = Arc::new(RecordingSender::default());
        let outcome = executor(store, sender.clone())
            .handle_inbound(&inbound("bom dia"))
            .await;

        assert!(matches!(outcome, FlowOutcome::Executed { .. }));
        assert_eq!(sender.sent().len(), 1);
    }

    #[tokio::test]
    async fn no_active_flow_means_no_action() {
        let store = Arc::new(MemoryStore::new());
        let sender = Arc::new(RecordingSender::default());
        let outcome = executor(store, sender.clone())
            .handle_inbound(&inbound("oi"))
            .await;

        assert_eq!(outcome, FlowOutcome::NoFlow);
        assert!(sender.sent().is_empty());
    }

    #[tokio::test]
    async fn buttons_prompt_parks_the_contact_until_a_selection() {
        let store = Arc::new(MemoryStore::new());
        store.put_flow(flow(
            "flow_missa",
            &["missa"],
            vec![
                buttons_node("menu", "O que deseja?", &["Agendar", "Cancelar"]),
                text_node("agendar", "Vamos agendar sua missa."),
                text_node("cancelar", "Agendamento cancelado."),
            ],
            vec![
                edge("e1", "menu", "agendar", Some("Agendar")),
                edge("e2", "menu", "cancelar", Some("Cancelar")),
            ],
        ));
        seed_contact(&store, None, None).await;

        let sender = Arc::new(RecordingSender::default());
        let exec = executor(store.clone(), sender.clone());

        // first message triggers the flow and renders the menu
        let outcome = exec.handle_inbound(&inbound("Quero agendar uma missa")).await;
        assert_eq!(
            outcome,
            FlowOutcome::Executed {
                flow_id: "flow_missa".to_string(),
                node_id: "menu".to_string()
            }
        );
        let contact = store.contact("5511999990000").unwrap();
        assert_eq!(contact.current_node.as_deref(), Some("menu"));
        assert_eq!(
            sender.sent(),
            vec![Sent::Buttons {
                to: "5511999990000".to_string(),
                body: "O que deseja?".to_string(),
                options: vec!["Agendar".to_string(), "Cancelar".to_string()],
            }]
        );

        // the selection advances along the labeled edge and answers at once
        let outcome = exec.handle_inbound(&inbound("Agendar")).await;
        assert_eq!(
            outcome,
            FlowOutcome::Executed {
                flow_id: "flow_missa".to_string(),
                node_id: "agendar".to_string()
            }
        );
        let contact = store.contact("5511999990000").unwrap();
        assert_eq!(contact.current_node.as_deref(), Some("agendar"));
        assert_eq!(sender.sent().len(), 2);
        assert_eq!(
            sender.sent()[1],
            Sent::Text {
                to: "5511999990000".to_string(),
                body: "Vamos agendar sua missa.".to_string()
            }
        );
    }

    #[tokio::test]
    async fn unselected_reply_reprompts_the_buttons() {
        let store = Arc::new(MemoryStore::new());
        store.put_flow(flow(
            "flow_missa",
            &["missa"],
            vec![
                buttons_node("menu", "O que deseja?", &["Agendar", "Cancelar"]),
                text_node("agendar", "Vamos agendar."),
            ],
            vec![edge("e1", "menu", "agendar", Some("Agendar"))],
        ));
        seed_contact(&store, Some("flow_missa"), Some("menu")).await;

        let sender = Arc::new(RecordingSender::default());
        let outcome = executor(store.clone(), sender.clone())
            .handle_inbound(&inbound("qualquer outra coisa"))
            .await;

        assert_eq!(
            outcome,
            FlowOutcome::Executed {
                flow_id: "flow_missa".to_string(),
                node_id: "menu".to_string()
            }
        );
        assert!(matches!(sender.sent()[0], Sent::Buttons { .. }));
        let contact = store.contact("5511999990000").unwrap();
        assert_eq!(contact.current_node.as_deref(), Some("menu"));
    }

    #[tokio::test]
    async fn redelivered_event_duplicates_sends_but_keeps_state_consistent() {
        // no dedup on provider message id; a replay repeats the side
        // effects but must leave the contact on a node that exists
        let store = Arc::new(MemoryStore::new());
        store.put_flow(flow(
            "flow_missa",
            &["missa"],
            vec![buttons_node("menu", "O que deseja?", &["Agendar"])],
            vec![],
        ));
        seed_contact(&store, None, None).await;

        let sender = Arc::new(RecordingSender::default());
        let exec = executor(store.clone(), sender.clone());
        let message = inbound("Quero agendar uma missa");
        exec.handle_inbound(&message).await;
        exec.handle_inbound(&message).await;

        assert_eq!(sender.sent().len(), 2);
        let contact = store.contact("5511999990000").unwrap();
        assert_eq!(contact.current_flow.as_deref(), Some("flow_missa"));
        assert_eq!(contact.current_node.as_deref(), Some("menu"));
    }

    #[tokio::test]
    async fn satisfied_condition_executes_true_branch_in_same_pass() {
        let store = Arc::new(MemoryStore::new());
        store.put_flow(flow(
            "flow_triagem",
            &["missa"],
            vec![
                FlowNode {
                    id: "gate".to_string(),
                    kind: NodeKind::Condition(ConditionData {
                        condition: Some("contains missa".to_string()),
                    }),
                },
                text_node("resposta", "Temos missas todos os dias às 7h."),
            ],
            vec![edge("e1", "gate", "resposta", Some("true"))],
        ));

        let sender = Arc::new(RecordingSender::default());
        let outcome = executor(store.clone(), sender.clone())
            .handle_inbound(&inbound("que horas é a missa?"))
            .await;

        // the condition node itself sends nothing
        assert_eq!(sender.sent().len(), 1);
        assert_eq!(
            outcome,
            FlowOutcome::Executed {
                flow_id: "flow_triagem".to_string(),
                node_id: "resposta".to_string()
            }
        );
    }

    #[tokio::test]
    async fn unsatisfied_condition_sends_nothing_and_keeps_position() {
        let store = Arc::new(MemoryStore::new());
        store.put_flow(flow(
            "flow_triagem",
            &[],
            vec![
                FlowNode {
                    id: "gate".to_string(),
                    kind: NodeKind::Condition(ConditionData {
                        condition: Some("contains missa".to_string()),
                    }),
                },
                text_node("resposta", "nunca enviado"),
            ],
            vec![edge("e1", "gate", "resposta", Some("true"))],
        ));
        seed_contact(&store, None, None).await;

        let sender = Arc::new(RecordingSender::default());
        let outcome = executor(store.clone(), sender.clone())
            .handle_inbound(&inbound("bom dia"))
            .await;

        assert_eq!(outcome, FlowOutcome::NoTransition);
        assert!(sender.sent().is_empty());
        let contact = store.contact("5511999990000").unwrap();
        assert!(contact.current_node.is_none());
    }

    #[tokio::test]
    async fn empty_text_node_sends_default_greeting() {
        let store = Arc::new(MemoryStore::new());
        store.put_flow(flow("f", &[], vec![text_node("t1", "")], vec![]));

        let sender = Arc::new(RecordingSender::default());
        executor(store, sender.clone())
            .handle_inbound(&inbound("oi"))
            .await;

        assert_eq!(
            sender.sent(),
            vec![Sent::Text {
                to: "5511999990000".to_string(),
                body: DEFAULT_TEXT.to_string()
            }]
        );
    }

    #[tokio::test]
    async fn image_node_without_url_is_a_noop_but_still_advances() {
        let store = Arc::new(MemoryStore::new());
        store.put_flow(flow(
            "f",
            &[],
            vec![
                FlowNode {
                    id: "img".to_string(),
                    kind: NodeKind::Image(MediaData {
                        file_url: None,
                        content: None,
                    }),
                },
                text_node("t1", "depois da imagem"),
            ],
            vec![edge("e1", "img", "t1", None)],
        ));
        seed_contact(&store, None, None).await;

        let sender = Arc::new(RecordingSender::default());
        executor(store.clone(), sender.clone())
            .handle_inbound(&inbound("oi"))
            .await;

        assert!(sender.sent().is_empty());
        let contact = store.contact("5511999990000").unwrap();
        assert_eq!(contact.current_node.as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn failed_send_still_advances_position() {
        let store = Arc::new(MemoryStore::new());
        store.put_flow(flow(
            "f",
            &[],
            vec![text_node("t1", "primeiro"), text_node("t2", "segundo")],
            vec![edge("e1", "t1", "t2", None)],
        ));
        seed_contact(&store, None, None).await;

        let sender = Arc::new(RecordingSender::default());
        sender.fail_all();
        executor(store.clone(), sender)
            .handle_inbound(&inbound("oi"))
            .await;

        let contact = store.contact("5511999990000").unwrap();
        assert_eq!(contact.current_node.as_deref(), Some("t2"));
        // failed sends are not recorded as sent messages
        assert!(store.messages().is_empty());
    }

    #[tokio::test]
    async fn stale_position_falls_back_to_selection() {
        let store = Arc::new(MemoryStore::new());
        store.put_flow(flow(
            "flow_novo",
            &["missa"],
            vec![text_node("n1", "novo fluxo")],
            vec![],
        ));
        seed_contact(&store, Some("flow_apagado"), Some("x1")).await;

        let sender = Arc::new(RecordingSender::default());
        let outcome = executor(store, sender.clone())
            .handle_inbound(&inbound("missa"))
            .await;

        assert_eq!(
            outcome,
            FlowOutcome::Executed {
                flow_id: "flow_novo".to_string(),
                node_id: "n1".to_string()
            }
        );
    }

    #[tokio::test]
    async fn outbound_sends_are_recorded_with_flow_provenance() {
        let store = Arc::new(MemoryStore::new());
        store.put_flow(flow("f", &[], vec![text_node("t1", "olá")], vec![]));
        // ensure quota bookkeeping also runs against a dashboard-saved row
        store.put_config(WhatsAppConfigRow {
            id: "default".to_string(),
            phone_number: "555".to_string(),
            access_token: "tok".to_string(),
            verify_token: "v".to_string(),
            webhook_url: None,
            is_active: true,
        });

        let sender = Arc::new(RecordingSender::default());
        executor(store.clone(), sender)
            .handle_inbound(&inbound("oi"))
            .await;

        let messages = store.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].flow_id.as_deref(), Some("f"));
        assert_eq!(messages[0].node_id.as_deref(), Some("t1"));
        assert_eq!(messages[0].status, "sent");
        assert_eq!(messages[0].message_id.as_deref(), Some("wamid.test"));

        let quota = store.quota_row().unwrap();
        assert_eq!(quota.messages_sent_today, 1);
    }
}
