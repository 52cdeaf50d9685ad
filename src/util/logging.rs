//! Message formats shared by the training and evaluation loops.

/// Format a message reporting the total number of matrix operations.
pub fn format_total_ops(count: usize) -> String {
    format!("Total matrix ops: {}", count)
}

/// Log the total number of matrix operations at info level.
pub fn log_total_ops(count: usize) {
    log::info!("{}", format_total_ops(count));
}

pub fn format_epoch_loss(epoch: usize, split: &str, loss: f32) -> String {
    format!("Epoch {:02} {} loss: {:1.4}", epoch, split, loss)
}

/// Format a checkpoint saved message.
pub fn format_checkpoint_saved(epoch: usize, valid_loss: f32) -> String {
    format!(
        "Saving model at epoch {:02}: validation loss improved to {:.4}",
        epoch, valid_loss
    )
}

pub fn format_skipped_window(epoch: usize, window: usize, reason: &str) -> String {
    format!("Epoch {:02}: skipping window {:03} ({})", epoch, window, reason)
}

/// Progress line for one training window.
pub fn format_window_loss(epoch: usize, window: usize, num_windows: usize, loss: f32) -> String {
    format!("{:02} ({:03}/{:03}): {:>2.4}", epoch, window, num_windows, loss)
}

pub fn format_test_losses(mse: f32, nll: f32) -> String {
    format!("Test MSE loss: {:.4}\nTest NLL loss: {:.4}", mse, nll)
}
