use console::style;

pub fn present_error(error: anyhow::Error) {
    let error_text = style("ERROR:").red().bold();
    eprintln!("\n{error_text} {error:#}");
}

pub fn present_notice(message: &str) {
    eprintln!("{}", style(message).dim());
}
