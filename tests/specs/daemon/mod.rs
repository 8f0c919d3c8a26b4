mod exec_job;
mod startup;
