// Dedicated server front end: command line, logging and the frame loop.

pub mod sys_ded;
