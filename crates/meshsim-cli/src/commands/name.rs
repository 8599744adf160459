//! Name inspection.

use anyhow::{Context, Result};
use meshsim_types::{ServiceName, filter_edge};

use crate::style::colors::SemanticStyle;
use crate::style::{print_labeled, print_spacer};

/// Print each segment of a name and its display forms.
pub fn explain(input: &str, reduce: bool) -> Result<()> {
    let input = input.trim();
    if input.contains(char::is_whitespace) {
        let edge = filter_edge(input, reduce).context("expected two valid names")?;
        println!("{edge}");
        return Ok(());
    }

    let name = ServiceName::parse(input)?;
    println!("{}", name.as_str().code());
    print_spacer();
    for (label, value) in [
        ("Architecture", name.arch()),
        ("Region", name.region()),
        ("Zone", name.zone()),
        ("Machine", name.machine()),
        ("Instance", name.instance()),
        ("Container", name.container()),
        ("Process", name.process()),
        ("Service", name.service()),
        ("Package", name.package()),
    ] {
        print_labeled(label, value);
    }
    print_spacer();
    print_labeled("Display", &name.display_name(reduce));
    Ok(())
}
