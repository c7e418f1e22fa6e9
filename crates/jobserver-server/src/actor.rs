use std::future::Future;

use log::error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

const ACTOR_CHANNEL_SIZE: usize = 8;

/// An actor owns its state exclusively and processes one message at a time.
/// Long-running work must be spawned via [`ActorContext::spawn`] and report back
/// to the actor with a message.
pub trait Actor: Sized + Send + 'static {
    type Message: Send + 'static;
    type Options;
    type Error: From<mpsc::error::SendError<Self::Message>> + std::fmt::Display;

    fn new(options: Self::Options) -> Self;
    fn start(&mut self, ctx: &mut ActorContext<Self>) -> Result<(), Self::Error>;
    fn receive(
        &mut self,
        ctx: &mut ActorContext<Self>,
        message: Self::Message,
    ) -> Result<ActorAction, Self::Error>;
    fn stop(self) -> Result<(), Self::Error>;
}

pub enum ActorAction {
    Continue,
    Stop,
}

pub struct ActorContext<T: Actor> {
    handle: ActorHandle<T>,
    tasks: JoinSet<()>,
}

impl<T: Actor> ActorContext<T> {
    fn new(handle: ActorHandle<T>) -> Self {
        Self {
            handle,
            tasks: JoinSet::new(),
        }
    }

    pub fn handle(&self) -> &ActorHandle<T> {
        &self.handle
    }

    /// Sends a message to the actor itself.
    /// The message is delivered asynchronously so that the actor never waits on its own mailbox.
    pub fn send(&mut self, message: T::Message) {
        let handle = self.handle.clone();
        self.tasks.spawn(async move {
            if let Err(e) = handle.send(message).await {
                error!("failed to send message to the actor itself: {e}");
            }
        });
    }

    /// Spawns a task that is aborted when the actor stops.
    pub fn spawn(&mut self, task: impl Future<Output = ()> + Send + 'static) {
        self.tasks.spawn(task);
    }

    fn reap(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            if let Err(e) = result {
                if e.is_panic() {
                    error!("actor task panicked: {e}");
                }
            }
        }
    }
}

pub struct ActorHandle<T>
where
    T: Actor,
{
    sender: mpsc::Sender<T::Message>,
    stopped: watch::Receiver<bool>,
}

impl<T> Clone for ActorHandle<T>
where
    T: Actor,
{
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            stopped: self.stopped.clone(),
        }
    }
}

impl<T: Actor> ActorHandle<T> {
    pub fn new(options: T::Options) -> Self {
        let (tx, mut rx) = mpsc::channel(ACTOR_CHANNEL_SIZE);
        let (stopped_tx, stopped_rx) = watch::channel::<bool>(false);
        let mut actor = T::new(options);
        let out = Self {
            sender: tx,
            stopped: stopped_rx,
        };
        let mut ctx = ActorContext::new(out.clone());
        tokio::spawn(async move {
            let result = async {
                actor.start(&mut ctx)?;
                while let Some(message) = rx.recv().await {
                    let action = actor.receive(&mut ctx, message)?;
                    ctx.reap();
                    match action {
                        ActorAction::Continue => {}
                        ActorAction::Stop => {
                            break;
                        }
                    }
                }
                actor.stop()
            }
            .await;
            if let Err(e) = result {
                error!("actor stopped with error: {e}");
            }
            let _ = stopped_tx.send(true);
        });
        out
    }

    pub async fn send(&self, message: T::Message) -> Result<(), T::Error> {
        self.sender.send(message).await.map_err(T::Error::from)
    }

    pub async fn wait_for_stop(mut self) {
        // We ignore the receiver error since the sender must have been dropped in this case,
        // which means the actor has stopped.
        let _ = self.stopped.wait_for(|x| *x).await;
    }
}
