mod health;
mod lifecycle;
mod recovery;
mod restart;
mod supervision;
mod termination;
